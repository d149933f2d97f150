use serde::{Deserialize, Serialize};

use crate::{Counter, Gauge};

/// Live statistics of one proxy engine.
///
/// The engine updates these from its own thread; reporters
/// only ever read them through [`ProxyCounters::snapshot`].
#[derive(Debug, Default)]
pub struct ProxyCounters {
    /// Connected clients, routed or not.
    pub clients: Gauge,
    /// Clients that upgraded to an encrypted transport.
    pub ssl_clients: Gauge,
    /// Session pools created.
    pub pools: Gauge,
    /// Open backend connections.
    pub backends: Gauge,
    /// Backends that can't go back to the idle list.
    pub dedicated_backends: Gauge,
    /// Backends waiting in an idle list.
    pub idle_backends: Gauge,
    /// Clients waiting for a backend.
    pub idle_clients: Gauge,
    /// Bytes written to clients.
    pub tx_bytes: Counter,
    /// Bytes written to backends.
    pub rx_bytes: Counter,
    /// Completed transactions.
    pub transactions: Counter,
}

impl ProxyCounters {
    pub fn snapshot(&self) -> ProxyState {
        ProxyState {
            clients: self.clients.get(),
            ssl_clients: self.ssl_clients.get(),
            pools: self.pools.get(),
            backends: self.backends.get(),
            dedicated_backends: self.dedicated_backends.get(),
            idle_backends: self.idle_backends.get(),
            idle_clients: self.idle_clients.get(),
            tx_bytes: self.tx_bytes.get(),
            rx_bytes: self.rx_bytes.get(),
            transactions: self.transactions.get(),
        }
    }
}

/// Point-in-time copy of [`ProxyCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyState {
    pub clients: usize,
    pub ssl_clients: usize,
    pub pools: usize,
    pub backends: usize,
    pub dedicated_backends: usize,
    pub idle_backends: usize,
    pub idle_clients: usize,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub transactions: u64,
}

impl std::ops::Add for ProxyState {
    type Output = ProxyState;

    fn add(self, rhs: Self) -> Self::Output {
        ProxyState {
            clients: self.clients + rhs.clients,
            ssl_clients: self.ssl_clients + rhs.ssl_clients,
            pools: self.pools + rhs.pools,
            backends: self.backends + rhs.backends,
            dedicated_backends: self.dedicated_backends + rhs.dedicated_backends,
            idle_backends: self.idle_backends + rhs.idle_backends,
            idle_clients: self.idle_clients + rhs.idle_clients,
            tx_bytes: self.tx_bytes + rhs.tx_bytes,
            rx_bytes: self.rx_bytes + rhs.rx_bytes,
            transactions: self.transactions + rhs.transactions,
        }
    }
}

impl std::iter::Sum for ProxyState {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ProxyState::default(), |acc, state| acc + state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_snapshot_and_sum() {
        let a = ProxyCounters::default();
        a.clients.incr();
        a.clients.incr();
        a.tx_bytes.add(100);

        let b = ProxyCounters::default();
        b.clients.incr();
        b.transactions.incr();

        let total: ProxyState = [a.snapshot(), b.snapshot()].into_iter().sum();
        assert_eq!(total.clients, 3);
        assert_eq!(total.tx_bytes, 100);
        assert_eq!(total.transactions, 1);

        let json = serde_json::to_value(total).unwrap();
        assert_eq!(json["clients"], 3);
    }
}
