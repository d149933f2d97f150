//! Client and backend sockets.

use std::fmt::Debug;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// Encrypted stream produced by a TLS or GSS transport.
///
/// It has to be non-blocking and report [`std::io::ErrorKind::WouldBlock`]
/// like a plain socket, and its descriptor is what gets registered
/// with the poller.
pub trait SecureStream: Read + Write + AsRawFd + Debug {}

/// Socket owned by a channel.
#[derive(Debug)]
pub enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
    Secure(Box<dyn SecureStream>),
    /// Placeholder while the real socket is handed to a transport.
    DevNull,
}

fn not_connected() -> Error {
    Error::new(ErrorKind::NotConnected, "socket was handed over")
}

impl Socket {
    /// Encrypted transport.
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Secure(_))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_nonblocking(nonblocking),
            Self::Unix(stream) => stream.set_nonblocking(nonblocking),
            // Transports hand over streams that are already non-blocking.
            Self::Secure(_) | Self::DevNull => Ok(()),
        }
    }

    /// Peer address for logging.
    pub fn peer(&self) -> String {
        match self {
            Self::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp".into()),
            Self::Unix(_) => "unix".into(),
            Self::Secure(_) => "secure".into(),
            Self::DevNull => "none".into(),
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
            Self::Secure(stream) => stream.read(buf),
            Self::DevNull => Err(not_connected()),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
            Self::Secure(stream) => stream.write(buf),
            Self::DevNull => Err(not_connected()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
            Self::Secure(stream) => stream.flush(),
            Self::DevNull => Ok(()),
        }
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(stream) => stream.as_raw_fd(),
            Self::Unix(stream) => stream.as_raw_fd(),
            Self::Secure(stream) => stream.as_raw_fd(),
            Self::DevNull => -1,
        }
    }
}

impl From<TcpStream> for Socket {
    fn from(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }
}

impl From<UnixStream> for Socket {
    fn from(stream: UnixStream) -> Self {
        Self::Unix(stream)
    }
}
