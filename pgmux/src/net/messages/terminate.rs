//! Terminate (F) message.

use crate::net::messages::{code, prelude::*};

#[derive(Debug, Clone, Copy, Default)]
pub struct Terminate;

impl Terminate {
    pub const BYTES: [u8; 5] = [b'X', 0, 0, 0, 4];
}

impl ToBytes for Terminate {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        Ok(Payload::named(self.code()).freeze())
    }
}

impl FromBytes for Terminate {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'X');
        Ok(Terminate)
    }
}

impl Protocol for Terminate {
    fn code(&self) -> char {
        'X'
    }
}
