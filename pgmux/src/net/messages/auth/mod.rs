//! Authentication messages a backend sends while it's being launched.

use crate::net::c_string_buf;

use super::{code, prelude::*};

pub mod password;
pub use password::Password;

/// Authentication messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    /// AuthenticationOk (B)
    Ok,
    /// AuthenticationCleartextPassword (B).
    ClearTextPassword,
    /// Md5 authentication challenge (B).
    Md5(Bytes),
    /// AuthenticationSASL (B)
    Sasl(String),
    /// Any other method, identified by its code.
    Other(i32),
}

impl FromBytes for Authentication {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'R');

        if bytes.remaining() < 8 {
            return Err(Error::Eof);
        }
        let _len = bytes.get_i32();

        let status = bytes.get_i32();

        match status {
            0 => Ok(Authentication::Ok),
            3 => Ok(Authentication::ClearTextPassword),
            5 => {
                if bytes.remaining() < 4 {
                    return Err(Error::Eof);
                }
                Ok(Authentication::Md5(bytes.split_to(4)))
            }
            10 => {
                let mechanism = c_string_buf(&mut bytes);
                Ok(Authentication::Sasl(mechanism))
            }
            status => Ok(Authentication::Other(status)),
        }
    }
}

impl Protocol for Authentication {
    fn code(&self) -> char {
        'R'
    }
}

impl ToBytes for Authentication {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());

        match self {
            Authentication::Ok => payload.put_i32(0),
            Authentication::ClearTextPassword => payload.put_i32(3),
            Authentication::Md5(salt) => {
                payload.put_i32(5);
                payload.put(salt.clone());
            }
            Authentication::Sasl(mechanism) => {
                payload.put_i32(10);
                payload.put_string(mechanism);
                payload.put_u8(0);
            }
            Authentication::Other(status) => payload.put_i32(*status),
        }

        Ok(payload.freeze())
    }
}
