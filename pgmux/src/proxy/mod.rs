//! Proxy engine.
//!
//! One proxy runs per worker thread. It owns the poller, every channel,
//! and the session pools, and moves bytes between paired client and
//! backend channels as sockets become ready. Nothing is shared with other
//! workers except the statistics counters and the shutdown flag.
//!
//! Channels are never dropped while events are being dispatched. A channel
//! that failed is marked disconnected and queued; the queue is drained
//! once the current batch of events has been handled.

pub mod arena;
pub mod attach;
pub mod channel;
pub mod error;
pub mod read;
pub mod write;

#[cfg(test)]
mod test;

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use pgmux_config::{Config, Tcp};
use pgmux_stats::ProxyCounters;
use tracing::{debug, error, info, warn};

pub use arena::{Arena, ChannelId, LISTENER_BIT};
pub use channel::{Channel, PoolId, Role};
pub use error::Error;

use crate::backend::{Launcher, PoolKey, SessionPool};
use crate::frontend::{SecureTransport, StartupNegotiator};
use crate::net::messages::{ErrorResponse, Terminate, ToBytes};
use crate::net::{tweak, Event, Events, FrameScanner, Listener, Poller, Socket, Token};

/// Events handled per poll.
const MAX_READY_EVENTS: usize = 128;
/// Longest wait for events, so shutdown is noticed.
const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Engine settings, taken from the configuration.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Backends per session pool.
    pub session_pool_size: usize,
    /// Clients per worker. Twice as many channels fit, for the backends.
    pub max_sessions: usize,
    /// Clients waiting per pool, 0 for no limit.
    pub max_pending_clients: usize,
    pub idle_backend_timeout: Option<Duration>,
    pub replay_startup_options: bool,
    pub multi_tenant: bool,
    pub max_message_size: usize,
    pub tcp: Tcp,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ProxySettings {
    fn from(config: &Config) -> Self {
        let general = &config.general;
        Self {
            session_pool_size: general.session_pool_size,
            max_sessions: general.max_sessions,
            max_pending_clients: general.max_pending_clients,
            idle_backend_timeout: general.idle_backend_timeout_duration(),
            replay_startup_options: general.replay_startup_options,
            multi_tenant: general.multi_tenant,
            max_message_size: general.max_message_size,
            tcp: config.tcp.clone(),
        }
    }
}

pub struct Proxy {
    poller: Poller,
    events: Events,
    channels: Arena<Channel>,
    listeners: Vec<Listener>,
    pools: Vec<SessionPool>,
    pool_index: FnvHashMap<PoolKey, PoolId>,
    /// Disconnected channels waiting to be dropped.
    hangout: Vec<ChannelId>,
    /// Backends that became ready for another client.
    ready: VecDeque<ChannelId>,
    /// Clients that have buffered requests but no readiness event coming.
    wakeups: VecDeque<ChannelId>,
    /// Clients that haven't sent a startup packet yet.
    n_accepted: usize,
    launcher: Box<dyn Launcher>,
    transport: Box<dyn SecureTransport>,
    scanner: FrameScanner,
    negotiator: StartupNegotiator,
    settings: ProxySettings,
    stats: Arc<ProxyCounters>,
    shutdown: Arc<AtomicBool>,
    last_idle_check: Instant,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("channels", &self.channels.len())
            .field("pools", &self.pools.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Proxy {
    /// Create a proxy. Fails only if the poller can't be created.
    pub fn new(
        settings: ProxySettings,
        launcher: Box<dyn Launcher>,
        transport: Box<dyn SecureTransport>,
        stats: Arc<ProxyCounters>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, Error> {
        Ok(Self {
            poller: Poller::new()?,
            events: Events::with_capacity(MAX_READY_EVENTS),
            channels: Arena::with_capacity(settings.max_sessions.saturating_mul(2)),
            listeners: vec![],
            pools: vec![],
            pool_index: FnvHashMap::default(),
            hangout: vec![],
            ready: VecDeque::new(),
            wakeups: VecDeque::new(),
            n_accepted: 0,
            launcher,
            transport,
            scanner: FrameScanner::new(settings.max_message_size),
            negotiator: StartupNegotiator,
            settings,
            stats,
            shutdown,
            last_idle_check: Instant::now(),
        })
    }

    /// Start accepting connections from this listener.
    pub fn add_listener(&mut self, listener: Listener) -> Result<(), Error> {
        let token = Token(LISTENER_BIT | self.listeners.len() as u64);
        self.poller.register_listener(&listener, token)?;
        self.listeners.push(listener);
        Ok(())
    }

    /// Take over an accepted client connection.
    pub fn add_client(&mut self, socket: Socket) -> Option<ChannelId> {
        if let Err(err) = socket.set_nonblocking(true) {
            warn!("couldn't make client socket non-blocking: {}", err);
            return None;
        }
        if let Err(err) = tweak(&socket, &self.settings.tcp) {
            debug!("couldn't apply TCP settings to client: {}", err);
        }

        let id = match self.channels.insert(Channel::client(socket)) {
            Ok(id) => id,
            Err(mut channel) => {
                warn!(
                    "too many sessions: {} clients, {} backends, increase \"max_sessions\"",
                    self.stats.clients.get(),
                    self.stats.backends.get()
                );
                report(&mut channel.socket, ErrorResponse::too_many_sessions());
                return None;
            }
        };

        let registered = self
            .channels
            .get(id)
            .map(|channel| self.poller.register(&channel.socket, id.token()));

        if let Some(Err(err)) = registered {
            error!("couldn't watch client socket: {}", err);
            self.channels.remove(id);
            return None;
        }

        self.n_accepted += 1;
        self.stats.clients.incr();
        debug!("new client {}", id);

        Some(id)
    }

    /// Run until shutdown is requested.
    pub fn run(&mut self) -> Result<(), Error> {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.poll_once()?;
        }

        self.shutdown_all();
        Ok(())
    }

    /// Wait for one batch of events and handle it.
    pub fn poll_once(&mut self) -> Result<usize, Error> {
        let timeout = self
            .settings
            .idle_backend_timeout
            .map(|timeout| timeout.min(WAIT_TIMEOUT))
            .unwrap_or(WAIT_TIMEOUT);
        self.poll(timeout)
    }

    pub(crate) fn poll(&mut self, timeout: Duration) -> Result<usize, Error> {
        let n = self.poller.wait(&mut self.events, Some(timeout))?;

        for i in 0..n {
            if let Some(event) = self.events.get(i) {
                self.dispatch(event);
            }
        }

        self.settle();
        self.idle_sweep();
        self.settle();

        Ok(n)
    }

    fn dispatch(&mut self, event: Event) {
        if event.token.0 & LISTENER_BIT != 0 {
            self.accept((event.token.0 & !LISTENER_BIT) as usize);
            return;
        }

        let Some(id) = ChannelId::from_token(event.token) else {
            return;
        };

        // Events for channels removed in an earlier batch carry a stale
        // generation and don't resolve.
        if !self.is_active(id) {
            return;
        }

        if event.writable {
            self.channel_write(id, false);
        }

        if (event.readable || event.closed) && self.is_active(id) {
            self.channel_read(id);
        }
    }

    fn is_active(&self, id: ChannelId) -> bool {
        self.channels
            .get(id)
            .map(|channel| !channel.disconnected)
            .unwrap_or(false)
    }

    fn accept(&mut self, listener: usize) {
        loop {
            let accepted = match self.listeners.get(listener) {
                Some(listener) => listener.accept(),
                None => return,
            };

            match accepted {
                Ok(Some(socket)) => {
                    self.add_client(socket);
                }
                Ok(None) => return,
                Err(err) => {
                    warn!("accept failed: {}", err);
                    return;
                }
            }
        }
    }

    /// Work that doesn't come from readiness events: rescheduling ready
    /// backends, reading requests clients left in their buffers, and
    /// dropping disconnected channels. Each step can queue more of the others.
    fn settle(&mut self) {
        loop {
            if let Some(backend) = self.ready.pop_front() {
                self.schedule(backend);
            } else if let Some(client) = self.wakeups.pop_front() {
                if self.is_active(client) {
                    self.channel_read(client);
                }
            } else if !self.hangout.is_empty() {
                self.sweep();
            } else {
                break;
            }
        }
    }

    /// Terminate backends idle for longer than the timeout.
    fn idle_sweep(&mut self) {
        let Some(timeout) = self.settings.idle_backend_timeout else {
            return;
        };

        let now = Instant::now();
        if now.duration_since(self.last_idle_check) < timeout {
            return;
        }
        self.last_idle_check = now;

        let expired = self
            .pools
            .iter()
            .flat_map(|pool| pool.idle())
            .filter(|id| {
                self.channels
                    .get(*id)
                    .map(|channel| now.duration_since(channel.last_activity) >= timeout)
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();

        for id in expired {
            if let Some(channel) = self.channels.get_mut(id) {
                debug!("{} idle for too long, terminating", channel);
                channel.interrupted = true;
            }
            self.channel_write(id, false);
        }
    }

    /// Drop disconnected channels.
    fn sweep(&mut self) {
        let hangout = std::mem::take(&mut self.hangout);

        for id in hangout {
            self.remove_channel(id);
        }
    }

    fn remove_channel(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.remove(id) else {
            return;
        };

        if let Err(err) = self.poller.deregister(&channel.socket) {
            debug!("deregister {}: {}", channel, err);
        }

        match channel.role {
            Role::Client(_) => {
                match channel.pool.and_then(|pool| self.pools.get_mut(pool)) {
                    Some(pool) => {
                        pool.n_connected_clients = pool.n_connected_clients.saturating_sub(1)
                    }
                    None => self.n_accepted = self.n_accepted.saturating_sub(1),
                }
                self.stats.clients.decr();
                if channel.socket.is_secure() {
                    self.stats.ssl_clients.decr();
                }
                debug!("{} removed", channel);
            }

            Role::Backend(ref backend) => {
                self.stats.backends.decr();
                let Some(pool_id) = channel.pool else {
                    return;
                };
                let Some(pool) = self.pools.get_mut(pool_id) else {
                    return;
                };
                pool.n_launched = pool.n_launched.saturating_sub(1);
                if backend.dedicated {
                    pool.n_dedicated = pool.n_dedicated.saturating_sub(1);
                    self.stats.dedicated_backends.decr();
                }
                debug!("{} removed [{}]", channel, pool.key());

                // Clients are waiting, replace the backend right away.
                if pool.n_pending() > 0 && !self.shutdown.load(Ordering::Relaxed) {
                    match self.backend_start(pool_id) {
                        Ok(backend) => {
                            info!("started replacement backend {}", backend);
                            self.reschedule(backend);
                        }
                        Err(err) => error!("couldn't start replacement backend: {}", err),
                    }
                }
            }
        }
    }

    /// Close everything. Clients are told why.
    pub fn shutdown_all(&mut self) {
        info!("shutting down, closing {} channels", self.channels.len());

        for id in self.channels.ids() {
            let Some(mut channel) = self.channels.remove(id) else {
                continue;
            };
            let _ = self.poller.deregister(&channel.socket);

            match channel.role {
                Role::Client(_) => {
                    if channel.pool.is_some() {
                        report(&mut channel.socket, ErrorResponse::shutting_down());
                    }
                    self.stats.clients.decr();
                    if channel.socket.is_secure() {
                        self.stats.ssl_clients.decr();
                    }
                }
                Role::Backend(ref backend) => {
                    let _ = channel.socket.write(&Terminate::BYTES);
                    self.stats.backends.decr();
                    if backend.dedicated {
                        self.stats.dedicated_backends.decr();
                    }
                    if channel.idle {
                        self.stats.idle_backends.decr();
                    }
                }
            }
        }

        for pool in &self.pools {
            self.stats.idle_clients.sub(pool.n_idle_clients);
        }
        self.stats.pools.sub(self.pools.len());
        self.pools.clear();
        self.pool_index.clear();
        self.hangout.clear();
        self.ready.clear();
        self.wakeups.clear();
        self.listeners.clear();
    }

    /// Pool with this index.
    pub fn pool(&self, id: PoolId) -> Option<&SessionPool> {
        self.pools.get(id)
    }

    /// Pool serving this key.
    pub fn find_pool(&self, key: &PoolKey) -> Option<&SessionPool> {
        self.pool_index.get(key).and_then(|id| self.pools.get(*id))
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn stats(&self) -> &Arc<ProxyCounters> {
        &self.stats
    }
}

/// Best-effort error report. The channel is closed right after,
/// so a short write is not retried.
pub(crate) fn report(socket: &mut Socket, error: ErrorResponse) {
    debug!("reporting to client: {}", error);
    match error.to_bytes() {
        Ok(bytes) => {
            let _ = socket.write(&bytes);
        }
        Err(err) => debug!("couldn't encode error: {}", err),
    }
}
