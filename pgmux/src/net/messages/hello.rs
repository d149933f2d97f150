//! Messages exchanged before a connection is routed.

use super::prelude::*;

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196608;
/// CancelRequest code.
pub const CANCEL_REQUEST_CODE: i32 = 80877102;
/// SSLRequest code.
pub const SSL_REQUEST_CODE: i32 = 80877103;
/// GSSENCRequest code.
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Startup packet sent to a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartupPacket {
    pub params: Vec<(String, String)>,
}

impl StartupPacket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter; empty values are skipped.
    pub fn param(mut self, name: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.params.push((name.to_string(), value.to_string()));
        }
        self
    }
}

impl ToBytes for StartupPacket {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::new();
        payload.put_i32(PROTOCOL_VERSION);

        for (name, value) in &self.params {
            payload.put_string(name);
            payload.put_string(value);
        }
        payload.put_u8(0);

        Ok(payload.freeze())
    }
}

/// Single-byte answer to SSLRequest or GSSENCRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionReply {
    /// SSL accepted.
    Ssl,
    /// GSS encryption accepted.
    Gss,
    /// Continue in plain text.
    No,
}

impl EncryptionReply {
    pub fn byte(&self) -> u8 {
        match self {
            Self::Ssl => b'S',
            Self::Gss => b'G',
            Self::No => b'N',
        }
    }
}

/// NegotiateProtocolVersion (B) message.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiateProtocolVersion {
    /// Newest minor version we support.
    pub minor: i32,
    /// Protocol options we don't recognize.
    pub unrecognized: Vec<String>,
}

impl ToBytes for NegotiateProtocolVersion {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_i32(self.minor);
        payload.put_i32(self.unrecognized.len() as i32);
        for option in &self.unrecognized {
            payload.put_string(option);
        }

        Ok(payload.freeze())
    }
}

impl FromBytes for NegotiateProtocolVersion {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        super::code!(bytes, 'v');

        if bytes.remaining() < 12 {
            return Err(Error::Eof);
        }
        let _len = bytes.get_i32();
        let minor = bytes.get_i32();
        let count = bytes.get_i32().max(0);
        let mut unrecognized = vec![];
        for _ in 0..count {
            unrecognized.push(crate::net::c_string_buf(&mut bytes));
        }

        Ok(Self {
            minor,
            unrecognized,
        })
    }
}

impl Protocol for NegotiateProtocolVersion {
    fn code(&self) -> char {
        'v'
    }
}
