//! Backend connections and the pools that own them.

pub mod error;
pub mod launcher;
pub mod options;
pub mod pool;

pub use error::Error;
pub use launcher::{backend_pid, LaunchRequest, Launched, Launcher, TcpLauncher};
pub use pool::{PoolKey, SessionPool};
