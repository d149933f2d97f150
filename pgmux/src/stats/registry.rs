//! Counters of every running engine.

use std::sync::Arc;

use parking_lot::Mutex;
use pgmux_stats::{ProxyCounters, ProxyState};

/// Engines register here when they start; reporters read snapshots.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    workers: Arc<Mutex<Vec<Arc<ProxyCounters>>>>,
}

impl Registry {
    /// Counters for a new engine. Engines are numbered in registration order.
    pub fn register(&self) -> Arc<ProxyCounters> {
        let counters = Arc::new(ProxyCounters::default());
        self.workers.lock().push(counters.clone());
        counters
    }

    /// One snapshot per engine.
    pub fn snapshot(&self) -> Vec<ProxyState> {
        self.workers
            .lock()
            .iter()
            .map(|counters| counters.snapshot())
            .collect()
    }

    /// All engines added up.
    pub fn total(&self) -> ProxyState {
        self.snapshot()
            .into_iter()
            .sum()
    }
}
