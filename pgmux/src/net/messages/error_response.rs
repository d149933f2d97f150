//! ErrorResponse (B) message.
use std::fmt::Display;

use super::prelude::*;
use crate::net::{c_string_buf, messages::code};

/// ErrorResponse (B) message.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl Default for ErrorResponse {
    fn default() -> Self {
        Self {
            severity: "ERROR".into(),
            code: String::default(),
            message: String::default(),
            detail: None,
            hint: None,
        }
    }
}

impl ErrorResponse {
    fn fatal(code: &str, message: impl ToString) -> Self {
        Self {
            severity: "FATAL".into(),
            code: code.into(),
            message: message.to_string(),
            ..Default::default()
        }
    }

    /// No event slot left for another channel.
    pub fn too_many_sessions() -> ErrorResponse {
        ErrorResponse {
            hint: Some("increase \"max_sessions\" in pgmux.toml".into()),
            ..Self::fatal("53300", "too many sessions")
        }
    }

    /// Pool is at capacity and its wait queue is full.
    pub fn too_many_waiting(user: &str, database: &str) -> ErrorResponse {
        ErrorResponse {
            detail: Some(format!(
                "pool for user \"{}\" and database \"{}\" has no backend available and its wait queue is full",
                user, database
            )),
            ..Self::fatal("53300", "too many clients waiting for a backend")
        }
    }

    /// Malformed startup or steady-state traffic.
    pub fn protocol_violation(message: impl ToString) -> ErrorResponse {
        Self::fatal("08P01", message)
    }

    pub fn unsupported_protocol(major: u16, minor: u16) -> ErrorResponse {
        ErrorResponse {
            detail: Some("only protocol version 3 is supported".into()),
            ..Self::fatal(
                "0A000",
                format!("unsupported frontend protocol {}.{}", major, minor),
            )
        }
    }

    pub fn no_user() -> ErrorResponse {
        Self::fatal("28000", "no PostgreSQL user name specified in startup packet")
    }

    pub fn replication_not_supported() -> ErrorResponse {
        Self::fatal(
            "0A000",
            "replication connections are not supported by the connection pooler",
        )
    }

    pub fn invalid_parameter_value(name: &str, value: &str) -> ErrorResponse {
        Self::fatal(
            "22023",
            format!("invalid value for parameter \"{}\": \"{}\"", name, value),
        )
    }

    /// Backend couldn't be started for this client.
    pub fn backend_launch(err: &impl std::error::Error) -> ErrorResponse {
        ErrorResponse {
            detail: Some(err.to_string()),
            ..Self::fatal("08006", "could not start backend connection")
        }
    }

    /// Backend went away while serving this client.
    pub fn backend_lost() -> ErrorResponse {
        Self::fatal(
            "08006",
            "backend connection was lost while serving the request",
        )
    }

    /// Pooler is shutting down.
    pub fn shutting_down() -> ErrorResponse {
        Self::fatal("57P01", "connection pooler is shutting down")
    }
}

impl Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} {}", self.severity, self.code, self.message)?;
        if let Some(ref detail) = self.detail {
            write!(f, "\n{}", detail)?
        }
        Ok(())
    }
}

impl FromBytes for ErrorResponse {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'E');

        if bytes.remaining() < 4 {
            return Err(Error::Eof);
        }
        let _len = bytes.get_i32();

        let mut error_response = ErrorResponse::default();

        while bytes.has_remaining() {
            let field = bytes.get_u8() as char;
            if field == '\0' {
                break;
            }
            let value = c_string_buf(&mut bytes);

            match field {
                'S' => error_response.severity = value,
                'C' => error_response.code = value,
                'M' => error_response.message = value,
                'D' => error_response.detail = Some(value),
                'H' => error_response.hint = Some(value),
                _ => continue,
            }
        }

        Ok(error_response)
    }
}

impl ToBytes for ErrorResponse {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());

        payload.put_u8(b'S');
        payload.put_string(&self.severity);

        payload.put_u8(b'V');
        payload.put_string(&self.severity);

        payload.put_u8(b'C');
        payload.put_string(&self.code);

        payload.put_u8(b'M');
        payload.put_string(&self.message);

        if let Some(ref detail) = self.detail {
            payload.put_u8(b'D');
            payload.put_string(detail);
        }

        if let Some(ref hint) = self.hint {
            payload.put_u8(b'H');
            payload.put_string(hint);
        }

        payload.put_u8(0);

        Ok(payload.freeze())
    }
}

impl Protocol for ErrorResponse {
    fn code(&self) -> char {
        'E'
    }
}
