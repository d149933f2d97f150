//! Sockets, framing and wire messages.

pub mod buffer;
pub mod error;
pub mod frame;
pub mod listener;
pub mod messages;
#[cfg(target_os = "linux")]
pub mod poller;
pub mod socket;
pub mod tweaks;

pub use buffer::Buffer;
pub use error::Error;
pub use frame::{Frame, FrameScanner, Phase};
pub use listener::Listener;
pub use messages::*;
#[cfg(target_os = "linux")]
pub use poller::{Event, Events, Poller, Token};
pub use socket::{SecureStream, Socket};
pub use tweaks::tweak;

use bytes::{Buf, Bytes};

/// Read a null-terminated string from the buffer.
///
/// Invalid UTF-8 is replaced and a missing terminator
/// consumes the rest of the buffer.
pub fn c_string_buf(buf: &mut Bytes) -> String {
    let len = memchr::memchr(0, buf.chunk()).unwrap_or(buf.remaining());
    let value = String::from_utf8_lossy(&buf[..len]).to_string();
    buf.advance((len + 1).min(buf.remaining()));
    value
}

/// Would-block errors are not errors in non-blocking I/O.
#[inline]
pub fn would_block(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
