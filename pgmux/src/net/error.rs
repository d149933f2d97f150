//! Network errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected message: expected '{0}', got '{1}'")]
    UnexpectedMessage(char, char),

    #[error("unexpected end of message")]
    Eof,

    #[error("invalid message length: {0}")]
    InvalidLength(i64),

    #[error("message of {0} bytes exceeds the configured maximum")]
    MessageTooLarge(usize),

    #[error("invalid startup packet length: {0}")]
    InvalidStartupLength(i64),

    #[error("unknown transaction state identifier: '{0}'")]
    UnknownTransactionStateIdentifier(char),

    #[error("unsupported authentication method: {0}")]
    UnsupportedAuthentication(i32),
}
