//! Backend errors.

use thiserror::Error;

use crate::net::messages::ErrorResponse;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("net: {0}")]
    Net(#[from] crate::net::Error),

    #[error("{0}")]
    ConnectionError(Box<ErrorResponse>),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(char),

    #[error("unsupported authentication: {0}")]
    UnsupportedAuthentication(String),

    #[error("no password configured for user \"{0}\"")]
    NoPassword(String),

    #[error("backend didn't send BackendKeyData")]
    NoBackendKeyData,

    #[error("no address for upstream host \"{0}\"")]
    NoAddress(String),

    #[error("no user to connect with, set \"upstream.user\" in multi-tenant mode")]
    NoUser,

    #[error("channel slots exhausted, increase \"max_sessions\"")]
    TooManySessions,
}
