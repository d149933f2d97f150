//! Client-facing protocol handling.

pub mod error;
pub mod guc;
pub mod startup;
pub mod tls;

pub use error::Error;
pub use guc::GucState;
pub use startup::{StartupNegotiator, StartupParams, StartupRequest};
pub use tls::{Encryption, Plaintext, SecureTransport};
