pub mod counter;
pub mod proxy;

pub use counter::{Counter, Gauge};
pub use proxy::{ProxyCounters, ProxyState};
