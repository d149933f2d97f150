//! Logging setup.

use std::io::IsTerminal;

use pgmux_config::LogFormat;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the default `info` level.
/// Calling it again does nothing.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .with_thread_names(true)
            .try_init(),

        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_thread_names(true)
            .with_current_span(false)
            .try_init(),
    };
}
