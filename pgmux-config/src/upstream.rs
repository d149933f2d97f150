use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The Postgres server backends are opened against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Upstream {
    /// Host name or IP address. A path starting with `/` is a UNIX socket directory.
    ///
    /// _Default:_ `127.0.0.1`
    #[serde(default = "Upstream::host")]
    pub host: String,

    /// _Default:_ `5432`
    #[serde(default = "Upstream::port")]
    pub port: u16,

    /// Milliseconds to wait for a backend to connect and authenticate.
    ///
    /// _Default:_ `5000`
    #[serde(default = "Upstream::default_connect_timeout")]
    pub connect_timeout: u64,

    /// `application_name` reported by spawned backends.
    #[serde(default = "Upstream::application_name")]
    pub application_name: String,

    /// Role backends log in as in multi-tenant mode, where clients
    /// switch to their own role with `set local role`.
    ///
    /// _Default:_ none, the client's user is used
    #[serde(default)]
    pub user: Option<String>,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            host: Self::host(),
            port: Self::port(),
            connect_timeout: Self::default_connect_timeout(),
            application_name: Self::application_name(),
            user: None,
        }
    }
}

impl Upstream {
    fn host() -> String {
        std::env::var("PGMUX_UPSTREAM_HOST").unwrap_or_else(|_| "127.0.0.1".into())
    }

    fn port() -> u16 {
        std::env::var("PGMUX_UPSTREAM_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5432)
    }

    fn default_connect_timeout() -> u64 {
        5_000
    }

    fn application_name() -> String {
        "pgmux_worker_backend".into()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    /// Upstream is reached over a UNIX domain socket.
    pub fn is_unix(&self) -> bool {
        self.host.starts_with('/')
    }
}
