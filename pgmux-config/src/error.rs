//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Deserialize(#[from] toml::de::Error),

    #[error("config error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("\"{0}\" is not a valid log format")]
    LogFormat(String),

    #[error("invalid setting \"{name}\": {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl Error {
    /// Attach the line number of a TOML parse failure.
    pub fn config(source: &str, err: toml::de::Error) -> Self {
        let line = err
            .span()
            .map(|span| source[..span.start.min(source.len())].matches('\n').count() + 1)
            .unwrap_or(0);

        Self::Parse {
            line,
            message: err.message().to_string(),
        }
    }

    pub fn invalid(name: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            name,
            reason: reason.to_string(),
        }
    }
}
