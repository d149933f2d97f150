//! Frontend errors.

use thiserror::Error;

use crate::net::messages::ErrorResponse;

/// Frontend error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("net: {0}")]
    Net(#[from] crate::net::Error),

    #[error("unsupported frontend protocol {major}.{minor}")]
    UnsupportedProtocol { major: u16, minor: u16 },

    #[error("invalid startup packet layout: expected terminator as last byte")]
    InvalidLayout,

    #[error("no PostgreSQL user name specified in startup packet")]
    NoUser,

    #[error("replication connections are not supported")]
    Replication,

    #[error("invalid value for parameter \"{name}\": \"{value}\"")]
    InvalidParameter { name: String, value: String },

    #[error("invalid cancel request length: {0}")]
    CancelLength(usize),
}

impl Error {
    /// What to tell the client before closing the connection.
    /// Errors without a response close the socket silently.
    pub fn response(&self) -> Option<ErrorResponse> {
        match self {
            Error::UnsupportedProtocol { major, minor } => {
                Some(ErrorResponse::unsupported_protocol(*major, *minor))
            }
            Error::InvalidLayout => Some(ErrorResponse::protocol_violation(self)),
            Error::NoUser => Some(ErrorResponse::no_user()),
            Error::Replication => Some(ErrorResponse::replication_not_supported()),
            Error::InvalidParameter { name, value } => {
                Some(ErrorResponse::invalid_parameter_value(name, value))
            }
            Error::Io(_) | Error::Net(_) | Error::CancelLength(_) => None,
        }
    }
}
