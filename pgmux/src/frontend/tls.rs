//! Hook for TLS and GSS encryption.
//!
//! Handshakes live outside the engine. The engine answers the
//! client's request with a single byte and, if the transport accepts,
//! hands the socket over and keeps talking through whatever comes back.

use std::io::{Error, ErrorKind, Result};

use crate::net::{SecureStream, Socket};

/// Kind of encryption requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    Ssl,
    Gss,
}

pub trait SecureTransport {
    /// Can this kind of encryption be offered?
    fn supports(&self, kind: Encryption) -> bool;

    /// Run the handshake over the socket and return the encrypted,
    /// non-blocking stream.
    fn accept(&mut self, kind: Encryption, socket: Socket) -> Result<Box<dyn SecureStream>>;
}

/// No encryption available, every request is declined.
#[derive(Debug, Default, Clone, Copy)]
pub struct Plaintext;

impl SecureTransport for Plaintext {
    fn supports(&self, _kind: Encryption) -> bool {
        false
    }

    fn accept(&mut self, kind: Encryption, _socket: Socket) -> Result<Box<dyn SecureStream>> {
        Err(Error::new(
            ErrorKind::Unsupported,
            format!("{:?} encryption is not configured", kind),
        ))
    }
}
