//! pgmux, a PostgreSQL connection multiplexer.
//!
//! Clients keep their session; backends are shared between the clients of
//! a (database, user) pool one transaction at a time. Session settings made
//! with `SET` are replayed as `SET LOCAL` so every transaction sees them.

#[cfg(not(target_os = "linux"))]
compile_error!("pgmux runs its engines on epoll and only builds on Linux");

pub mod backend;
pub mod cli;
pub mod frontend;
pub mod logger;
pub mod net;
pub mod proxy;
pub mod stats;
pub mod worker;
