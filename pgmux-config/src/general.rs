use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// General settings are relevant to the operations of the pooler itself, or apply to all session pools.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct General {
    /// IP addresses of the local network interfaces the pooler will listen on.
    ///
    /// _Default:_ `["0.0.0.0"]`
    #[serde(default = "General::listen_addresses")]
    pub listen_addresses: Vec<String>,

    /// The TCP port clients connect to.
    ///
    /// _Default:_ `6432`
    #[serde(default = "General::port")]
    pub port: u16,

    /// Directory for the UNIX domain socket `.s.PGSQL.<port>`. Empty disables it.
    #[serde(default = "General::unix_socket_dir")]
    pub unix_socket_dir: String,

    /// Number of independent proxy engines. Each one runs on its own thread with its own
    /// listeners, pools and backends; the kernel spreads connections between them.
    ///
    /// _Default:_ `1`
    #[serde(default = "General::workers")]
    pub workers: usize,

    /// Maximum number of backend connections per (database, user) pool.
    ///
    /// _Default:_ `10`
    #[serde(default = "General::session_pool_size")]
    pub session_pool_size: usize,

    /// Maximum number of client sessions per worker. Clients and backends share
    /// `2 * max_sessions` event slots.
    ///
    /// _Default:_ `1000`
    #[serde(default = "General::max_sessions")]
    pub max_sessions: usize,

    /// Maximum number of clients allowed to wait for a backend in one pool. `0` means the queue is unbounded.
    #[serde(default = "General::max_pending_clients")]
    pub max_pending_clients: usize,

    /// Terminate backends idle for longer than this. Milliseconds, `0` disables.
    #[serde(default = "General::idle_backend_timeout")]
    pub idle_backend_timeout: u64,

    /// Replay client startup options with `SET LOCAL` on every statement, instead of
    /// passing them to newly spawned backends.
    #[serde(default = "General::replay_startup_options")]
    pub replay_startup_options: bool,

    /// Pool backends by database only and switch roles with `SET LOCAL ROLE`.
    #[serde(default = "General::multi_tenant")]
    pub multi_tenant: bool,

    /// Largest protocol message accepted from clients or backends, in bytes.
    ///
    /// _Default:_ `1073741824` (1 GiB)
    #[serde(default = "General::max_message_size")]
    pub max_message_size: usize,

    /// OpenMetrics HTTP endpoint port.
    #[serde(default = "General::openmetrics_port")]
    pub openmetrics_port: Option<u16>,

    /// How often to log statistics. Milliseconds, `0` disables.
    ///
    /// _Default:_ `60000`
    #[serde(default = "General::stats_period")]
    pub stats_period: u64,

    /// Log output format.
    #[serde(default = "General::log_format")]
    pub log_format: LogFormat,
}

impl Default for General {
    fn default() -> Self {
        Self {
            listen_addresses: Self::listen_addresses(),
            port: Self::port(),
            unix_socket_dir: Self::unix_socket_dir(),
            workers: Self::workers(),
            session_pool_size: Self::session_pool_size(),
            max_sessions: Self::max_sessions(),
            max_pending_clients: Self::max_pending_clients(),
            idle_backend_timeout: Self::idle_backend_timeout(),
            replay_startup_options: Self::replay_startup_options(),
            multi_tenant: Self::multi_tenant(),
            max_message_size: Self::max_message_size(),
            openmetrics_port: Self::openmetrics_port(),
            stats_period: Self::stats_period(),
            log_format: Self::log_format(),
        }
    }
}

impl General {
    fn env_or_default<T: std::str::FromStr>(env_var: &str, default: T) -> T {
        env::var(env_var)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn env_string_or_default(env_var: &str, default: &str) -> String {
        env::var(env_var).unwrap_or_else(|_| default.to_string())
    }

    fn env_bool_or_default(env_var: &str, default: bool) -> bool {
        env::var(env_var)
            .ok()
            .and_then(|v| match v.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    fn env_option<T: std::str::FromStr>(env_var: &str) -> Option<T> {
        env::var(env_var).ok().and_then(|v| v.parse().ok())
    }

    fn listen_addresses() -> Vec<String> {
        env::var("PGMUX_LISTEN_ADDRESSES")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|addr| addr.trim().to_string())
                    .filter(|addr| !addr.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["0.0.0.0".into()])
    }

    fn port() -> u16 {
        Self::env_or_default("PGMUX_PORT", 6432)
    }

    fn unix_socket_dir() -> String {
        Self::env_string_or_default("PGMUX_UNIX_SOCKET_DIR", "")
    }

    fn workers() -> usize {
        Self::env_or_default("PGMUX_WORKERS", 1)
    }

    fn session_pool_size() -> usize {
        Self::env_or_default("PGMUX_SESSION_POOL_SIZE", 10)
    }

    fn max_sessions() -> usize {
        Self::env_or_default("PGMUX_MAX_SESSIONS", 1000)
    }

    fn max_pending_clients() -> usize {
        Self::env_or_default("PGMUX_MAX_PENDING_CLIENTS", 0)
    }

    fn idle_backend_timeout() -> u64 {
        Self::env_or_default("PGMUX_IDLE_BACKEND_TIMEOUT", 0)
    }

    fn replay_startup_options() -> bool {
        Self::env_bool_or_default("PGMUX_REPLAY_STARTUP_OPTIONS", false)
    }

    fn multi_tenant() -> bool {
        Self::env_bool_or_default("PGMUX_MULTI_TENANT", false)
    }

    fn max_message_size() -> usize {
        Self::env_or_default("PGMUX_MAX_MESSAGE_SIZE", 1 << 30)
    }

    fn openmetrics_port() -> Option<u16> {
        Self::env_option("PGMUX_OPENMETRICS_PORT")
    }

    fn stats_period() -> u64 {
        Self::env_or_default("PGMUX_STATS_PERIOD", 60_000)
    }

    fn log_format() -> LogFormat {
        Self::env_or_default("PGMUX_LOG_FORMAT", LogFormat::Text)
    }

    /// Idle backend timeout, if enabled.
    pub fn idle_backend_timeout_duration(&self) -> Option<Duration> {
        if self.idle_backend_timeout == 0 {
            None
        } else {
            Some(Duration::from_millis(self.idle_backend_timeout))
        }
    }

    /// Period of the statistics log line, if enabled.
    pub fn stats_period_duration(&self) -> Option<Duration> {
        if self.stats_period == 0 {
            None
        } else {
            Some(Duration::from_millis(self.stats_period))
        }
    }

    /// Path of the UNIX domain socket, if enabled.
    pub fn unix_socket_path(&self) -> Option<PathBuf> {
        if self.unix_socket_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.unix_socket_dir).join(format!(".s.PGSQL.{}", self.port)))
        }
    }

    /// Check settings that have no usable value.
    pub fn check(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::invalid("workers", "must be at least 1"));
        }

        if self.session_pool_size == 0 {
            return Err(Error::invalid("session_pool_size", "must be at least 1"));
        }

        if self.max_sessions == 0 {
            return Err(Error::invalid("max_sessions", "must be at least 1"));
        }

        if self.listen_addresses.is_empty() && self.unix_socket_dir.is_empty() {
            return Err(Error::invalid(
                "listen_addresses",
                "no TCP address or UNIX socket directory to listen on",
            ));
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(Error::LogFormat(s.to_string())),
        }
    }
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
