//! PostgreSQL wire protocol messages the engine
//! produces or has to look inside of.

pub mod auth;
pub mod backend_key;
pub mod error_response;
pub mod hello;
pub mod payload;
pub mod query;
pub mod rfq;
pub mod tag;
pub mod terminate;

pub use auth::{Authentication, Password};
pub use backend_key::BackendKeyData;
pub use error_response::ErrorResponse;
pub use hello::{EncryptionReply, NegotiateProtocolVersion, StartupPacket};
pub use payload::Payload;
pub use query::Query;
pub use rfq::{ReadyForQuery, TransactionState};
pub use tag::{BackendTag, FrontendTag};
pub use terminate::Terminate;

use bytes::Bytes;

use super::Error;

/// Convert message to bytes.
pub trait ToBytes {
    fn to_bytes(&self) -> Result<Bytes, Error>;
}

/// Parse message from bytes.
pub trait FromBytes: Sized {
    fn from_bytes(bytes: Bytes) -> Result<Self, Error>;
}

/// Message identified by a 1-byte code.
pub trait Protocol: ToBytes + FromBytes {
    fn code(&self) -> char;
}

/// Check the message code and bail out if it's not the one we expect.
macro_rules! code {
    ($bytes:expr, $code:expr) => {
        if !$bytes.has_remaining() {
            return Err(crate::net::Error::Eof);
        }
        let code = $bytes.get_u8() as char;
        if code != $code {
            return Err(crate::net::Error::UnexpectedMessage($code, code));
        }
    };
}

pub(crate) use code;

pub mod prelude {
    pub use super::{FromBytes, Payload, Protocol, ToBytes};
    pub use crate::net::Error;
    pub use bytes::{Buf, BufMut, Bytes};
}
