//! Proxy errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("backend: {0}")]
    Backend(#[from] crate::backend::Error),
}
