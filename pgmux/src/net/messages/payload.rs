//! Message writer that fills in the length for us.

use std::ops::{Deref, DerefMut};

use bytes::{BufMut, Bytes, BytesMut};

/// Wire protocol message under construction.
#[derive(Debug, Default)]
pub struct Payload {
    bytes: BytesMut,
    code: Option<char>,
}

impl Payload {
    /// Message with a tag.
    pub fn named(code: char) -> Self {
        Self {
            bytes: BytesMut::new(),
            code: Some(code),
        }
    }

    /// Message without a tag, e.g. the startup packet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a null-terminated string.
    pub fn put_string(&mut self, value: &str) {
        self.bytes.put_slice(value.as_bytes());
        self.bytes.put_u8(0);
    }

    /// Prepend the tag and the length.
    pub fn freeze(self) -> Bytes {
        let mut message = BytesMut::with_capacity(self.bytes.len() + 5);
        if let Some(code) = self.code {
            message.put_u8(code as u8);
        }
        message.put_i32(self.bytes.len() as i32 + 4);
        message.put_slice(&self.bytes);
        message.freeze()
    }
}

impl Deref for Payload {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl DerefMut for Payload {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_payload() {
        let mut payload = Payload::named('Q');
        payload.put_string("SELECT 1");
        assert_eq!(&payload.freeze()[..], b"Q\0\0\0\x0dSELECT 1\0");

        let mut payload = Payload::new();
        payload.put_i32(80877103);
        assert_eq!(&payload.freeze()[..], &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
    }
}
