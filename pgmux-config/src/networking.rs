use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::human_duration_optional;

/// Socket options applied to client and backend TCP connections.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Tcp {
    /// Send keep-alive probes on idle connections.
    ///
    /// _Default:_ `true`
    #[serde(default = "Tcp::keepalive_enabled")]
    keepalive: bool,
    /// Idle time before the first probe, in milliseconds. The OS default when unset.
    time: Option<u64>,
    /// Time between probes, in milliseconds.
    interval: Option<u64>,
    /// Unanswered probes before the connection is dropped.
    retries: Option<u32>,
    /// `TCP_USER_TIMEOUT` in milliseconds. Linux only, ignored elsewhere.
    user_timeout: Option<u64>,
}

impl std::fmt::Display for Tcp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let retries = self
            .retries
            .map(|retries| retries.to_string())
            .unwrap_or_else(|| "default".into());

        write!(
            f,
            "keepalive={} time={} interval={} retries={} user_timeout={}",
            self.keepalive,
            human_duration_optional(self.time()),
            human_duration_optional(self.interval()),
            retries,
            human_duration_optional(self.user_timeout()),
        )
    }
}

impl Default for Tcp {
    fn default() -> Self {
        Self {
            keepalive: Self::keepalive_enabled(),
            time: None,
            interval: None,
            retries: None,
            user_timeout: None,
        }
    }
}

impl Tcp {
    fn keepalive_enabled() -> bool {
        true
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    pub fn time(&self) -> Option<Duration> {
        self.time.map(Duration::from_millis)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval.map(Duration::from_millis)
    }

    /// Zero means the OS default.
    pub fn user_timeout(&self) -> Option<Duration> {
        self.user_timeout
            .filter(|timeout| *timeout > 0)
            .map(Duration::from_millis)
    }

    pub fn retries(&self) -> Option<u32> {
        self.retries
    }
}
