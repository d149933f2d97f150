//! BackendKeyData (B) message.

use crate::net::messages::code;
use crate::net::messages::prelude::*;

/// Identifies a backend process, for cancel requests and logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BackendKeyData {
    pub pid: i32,
    pub secret: i32,
}

impl BackendKeyData {
    /// Find the key in a sequence of backend messages without copying them.
    pub fn find(messages: &[u8]) -> Option<Self> {
        let mut offset = 0;

        while offset + 5 <= messages.len() {
            let len = i32::from_be_bytes(messages[offset + 1..offset + 5].try_into().ok()?);
            if len < 4 {
                return None;
            }

            if messages[offset] == b'K' {
                let body = messages.get(offset + 5..offset + 13)?;
                return Some(Self {
                    pid: i32::from_be_bytes(body[..4].try_into().ok()?),
                    secret: i32::from_be_bytes(body[4..].try_into().ok()?),
                });
            }

            offset += len as usize + 1;
        }

        None
    }
}

impl ToBytes for BackendKeyData {
    fn to_bytes(&self) -> Result<bytes::Bytes, crate::net::Error> {
        let mut payload = Payload::named(self.code());
        payload.put_i32(self.pid);
        payload.put_i32(self.secret);
        Ok(payload.freeze())
    }
}

impl FromBytes for BackendKeyData {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'K');

        if bytes.remaining() < 12 {
            return Err(Error::Eof);
        }
        let _len = bytes.get_i32();

        Ok(Self {
            pid: bytes.get_i32(),
            secret: bytes.get_i32(),
        })
    }
}

impl Protocol for BackendKeyData {
    fn code(&self) -> char {
        'K'
    }
}
