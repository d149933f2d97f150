//! Periodic stats line.

use std::time::Duration;

use pgmux_stats::ProxyState;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::Registry;

pub struct Logger {
    registry: Registry,
    period: Duration,
}

impl Logger {
    pub fn new(registry: Registry, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Log totals every period, forever.
    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires right away.
        ticker.tick().await;

        let mut previous = self.registry.total();

        loop {
            ticker.tick().await;
            let current = self.registry.total();
            info!("{}", summary(&previous, &current, self.period));
            previous = current;
        }
    }
}

/// Gauges as they are, counters as a rate over the period.
fn summary(previous: &ProxyState, current: &ProxyState, period: Duration) -> String {
    let seconds = period.as_secs_f64().max(1.0);
    let rate = |now: u64, before: u64| (now.saturating_sub(before) as f64 / seconds).round() as u64;

    format!(
        "[stats] clients: {} (idle {}, ssl {}), backends: {} (idle {}, dedicated {}), pools: {}, \
         xact/s: {}, in: {} B/s, out: {} B/s",
        current.clients,
        current.idle_clients,
        current.ssl_clients,
        current.backends,
        current.idle_backends,
        current.dedicated_backends,
        current.pools,
        rate(current.transactions, previous.transactions),
        rate(current.rx_bytes, previous.rx_bytes),
        rate(current.tx_bytes, previous.tx_bytes),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_summary() {
        let previous = ProxyState {
            transactions: 100,
            tx_bytes: 1000,
            ..Default::default()
        };
        let current = ProxyState {
            clients: 4,
            idle_clients: 1,
            backends: 2,
            pools: 1,
            transactions: 300,
            tx_bytes: 3000,
            rx_bytes: 500,
            ..Default::default()
        };

        let line = summary(&previous, &current, Duration::from_secs(10));
        assert_eq!(
            line,
            "[stats] clients: 4 (idle 1, ssl 0), backends: 2 (idle 0, dedicated 0), pools: 1, \
             xact/s: 20, in: 50 B/s, out: 200 B/s"
        );
    }

    #[tokio::test]
    async fn test_logger_keeps_running() {
        let registry = Registry::default();
        registry.register().clients.incr();

        let logger = Logger::new(registry, Duration::from_millis(10));
        let handle = tokio::spawn(logger.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
