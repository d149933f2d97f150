//! Proxy engines on their own threads.
//!
//! Every worker binds its own TCP listeners with `SO_REUSEPORT` and the
//! kernel spreads new connections between them. Only the first worker
//! listens on the UNIX socket.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use pgmux_config::ConfigAndUsers;
use thiserror::Error;
use tracing::{error, info};

use crate::backend::TcpLauncher;
use crate::frontend::Plaintext;
use crate::net::Listener;
use crate::proxy::{self, Proxy, ProxySettings};
use crate::stats::Registry;

#[derive(Debug, Error)]
pub enum Error {
    #[error("couldn't bind \"{address}\": {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't start worker thread: {0}")]
    Spawn(std::io::Error),
}

/// Listeners for one worker.
pub fn bind(config: &ConfigAndUsers, worker: usize) -> Result<Vec<Listener>, Error> {
    let general = &config.config.general;
    let reuse_port = general.workers > 1;
    let mut listeners = vec![];

    for address in &general.listen_addresses {
        let listener =
            Listener::tcp(address, general.port, reuse_port).map_err(|source| Error::Bind {
                address: format!("{}:{}", address, general.port),
                source,
            })?;
        listeners.push(listener);
    }

    if worker == 0 {
        if let Some(path) = general.unix_socket_path() {
            let listener = Listener::unix(&path).map_err(|source| Error::Bind {
                address: path.display().to_string(),
                source,
            })?;
            listeners.push(listener);
        }
    }

    Ok(listeners)
}

pub struct Workers {
    handles: Vec<JoinHandle<Result<(), proxy::Error>>>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Bind every worker's listeners, then start the threads.
    /// Nothing runs if any address can't be bound.
    pub fn spawn(config: &ConfigAndUsers, registry: &Registry) -> Result<Self, Error> {
        let workers = config.config.general.workers;
        let mut listeners = Vec::with_capacity(workers);
        for worker in 0..workers {
            listeners.push(bind(config, worker)?);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(workers);

        for (worker, listeners) in listeners.into_iter().enumerate() {
            let settings = ProxySettings::from(&config.config);
            let launcher = TcpLauncher::new(&config.config.upstream, &config.users);
            let counters = registry.register();
            let shutdown = shutdown.clone();

            let handle = thread::Builder::new()
                .name(format!("pgmux-worker-{}", worker))
                .spawn(move || {
                    let mut proxy = Proxy::new(
                        settings,
                        Box::new(launcher),
                        Box::new(Plaintext),
                        counters,
                        shutdown,
                    )?;

                    for listener in listeners {
                        proxy.add_listener(listener)?;
                    }

                    info!("worker {} started", worker);
                    proxy.run()
                })
                .map_err(Error::Spawn)?;

            handles.push(handle);
        }

        Ok(Self { handles, shutdown })
    }

    /// Set it to make every worker close its sessions and exit.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Wait for every worker. Returns how many of them failed.
    pub fn join(self) -> usize {
        let mut failed = 0;

        for (worker, handle) in self.handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(())) => info!("worker {} stopped", worker),
                Ok(Err(err)) => {
                    error!("worker {} failed: {}", worker, err);
                    failed += 1;
                }
                Err(_) => {
                    error!("worker {} panicked", worker);
                    failed += 1;
                }
            }
        }

        failed
    }
}
