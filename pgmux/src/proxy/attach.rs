//! Pairing clients with backends.
//!
//! A backend belongs to a client only while the client has a request
//! in flight. As soon as the backend reports it's idle and its answer
//! reached the client, it goes to the next waiting client, or back to
//! the pool's idle list.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::{report, Channel, ChannelId, PoolId, Proxy};
use crate::backend::{backend_pid, Error as BackendError, PoolKey, SessionPool};
use crate::frontend::{GucState, StartupParams};
use crate::net::messages::ErrorResponse;
use crate::net::tweak;

impl Proxy {
    /// Route a client that sent a valid startup packet to its pool.
    pub(super) fn client_connect(&mut self, id: ChannelId, params: StartupParams) {
        let key = if self.settings.multi_tenant {
            PoolKey::new(&params.database, "")
        } else {
            PoolKey::new(&params.database, &params.user)
        };

        let pool_id = match self.pool_index.get(&key) {
            Some(pool_id) => *pool_id,
            None => {
                let pool_id = self.pools.len();
                info!("new pool [{}]", key);
                self.pools.push(SessionPool::new(key.clone()));
                self.pool_index.insert(key, pool_id);
                self.stats.pools.incr();
                pool_id
            }
        };

        let Some(pool) = self.pools.get_mut(pool_id) else {
            return;
        };

        let mut guc = if self.settings.multi_tenant {
            GucState::multi_tenant(&params.user)
        } else {
            GucState::default()
        };

        if self.settings.replay_startup_options {
            for (name, value) in &params.options {
                guc.startup_option(name, value);
            }
        } else {
            pool.capture_options(
                params.cmdline_options.as_deref(),
                &params.options,
                params.application_name.as_deref(),
            );
        }

        pool.n_connected_clients += 1;
        pool.n_idle_clients += 1;
        self.stats.idle_clients.incr();
        self.n_accepted = self.n_accepted.saturating_sub(1);

        let Some(channel) = self.channels.get_mut(id) else {
            return;
        };

        channel.pool = Some(pool_id);
        channel.idle = true;
        if let Some(state) = channel.client_state() {
            state.guc = guc;
            state.user = params.user;
            state.database = params.database;
            state.application_name = params.application_name;
        }

        info!("{} connected", channel);
    }

    /// Find a backend for a client: an idle one, a new one, or
    /// a place in the queue.
    pub(super) fn client_attach(&mut self, id: ChannelId) {
        let Some(client) = self.channels.get_mut(id) else {
            return;
        };
        let Some(pool_id) = client.pool else {
            return;
        };
        let Some(pool) = self.pools.get_mut(pool_id) else {
            return;
        };

        if client.idle {
            client.idle = false;
            pool.n_idle_clients = pool.n_idle_clients.saturating_sub(1);
            self.stats.idle_clients.decr();
        }

        while let Some(backend) = pool.pop_idle() {
            let Some(channel) = self.channels.get_mut(backend) else {
                continue;
            };
            if channel.disconnected {
                continue;
            }

            channel.idle = false;
            channel.last_activity = Instant::now();
            self.stats.idle_backends.decr();
            self.pair(id, backend);
            return;
        }

        if pool.can_launch(self.settings.session_pool_size) {
            match self.backend_start(pool_id) {
                Ok(backend) => self.pair(id, backend),
                Err(BackendError::TooManySessions) => {
                    warn!("no channel slot left to start a backend for client {}", id);
                    self.reject(id, ErrorResponse::too_many_sessions());
                }
                Err(err) => {
                    error!("couldn't start backend: {}", err);
                    self.reject(id, ErrorResponse::backend_launch(&err));
                }
            }
            return;
        }

        let max_pending = self.settings.max_pending_clients;
        if max_pending > 0 && pool.n_pending() >= max_pending {
            let (user, database) = self
                .channels
                .get_mut(id)
                .and_then(|channel| channel.client_state())
                .map(|state| (state.user.clone(), state.database.clone()))
                .unwrap_or_default();
            self.reject(id, ErrorResponse::too_many_waiting(&user, &database));
            return;
        }

        pool.push_pending(id);
        debug!("client {} waiting for a backend [{}]", id, pool.key());
    }

    /// Open a new backend for a pool.
    pub(super) fn backend_start(&mut self, pool_id: PoolId) -> Result<ChannelId, BackendError> {
        if self.channels.is_full() {
            return Err(BackendError::TooManySessions);
        }

        let request = self
            .pools
            .get(pool_id)
            .map(|pool| pool.launch_request())
            .unwrap_or_default();

        let launched = self.launcher.launch(&request)?;

        launched.socket.set_nonblocking(true)?;
        if let Err(err) = tweak(&launched.socket, &self.settings.tcp) {
            debug!("couldn't apply TCP settings to backend: {}", err);
        }

        let pid = backend_pid(&launched.handshake).unwrap_or_default();
        let channel = Channel::backend(launched.socket, pid, launched.handshake, pool_id);
        let id = self
            .channels
            .insert(channel)
            .map_err(|_| BackendError::TooManySessions)?;

        let registered = self
            .channels
            .get(id)
            .map(|channel| self.poller.register(&channel.socket, id.token()));

        if let Some(Err(err)) = registered {
            self.channels.remove(id);
            return Err(err.into());
        }

        if let Some(pool) = self.pools.get_mut(pool_id) {
            pool.n_launched += 1;
        }
        self.stats.backends.incr();

        Ok(id)
    }

    fn pair(&mut self, client: ChannelId, backend: ChannelId) {
        if let Some((client_channel, backend_channel)) = self.channels.get2_mut(client, backend) {
            client_channel.peer = Some(backend);
            backend_channel.peer = Some(client);
            debug!("{} => {}", client_channel, backend_channel);
        }
    }

    /// Replay the backend's handshake to a client that hasn't seen one.
    pub(super) fn send_handshake(&mut self, client: ChannelId, backend: ChannelId) -> bool {
        let Some((client_channel, backend_channel)) = self.channels.get2_mut(client, backend)
        else {
            return false;
        };

        let handshake = match backend_channel.backend_state() {
            Some(state) => state.handshake.clone(),
            None => return false,
        };

        backend_channel.buffer.load(&handshake);
        backend_channel.ready_for_query = true;
        if let Some(state) = client_channel.client_state() {
            state.handshake_sent = true;
        }

        self.channel_write(client, false)
    }

    /// Backend that went ready earlier: reschedule it if it still is
    /// and the client got everything.
    pub(super) fn schedule(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.get(id) else {
            return;
        };

        if channel.disconnected
            || !channel.is_backend()
            || !channel.ready_for_query
            || channel.buffer.pending() > 0
        {
            return;
        }

        self.reschedule(id);
    }

    /// Take a backend away from its client and give it to the next
    /// one waiting, or put it on the idle list.
    pub(super) fn reschedule(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.get_mut(id) else {
            return;
        };

        if channel.disconnected {
            return;
        }

        channel.ready_for_query = false;
        let client = channel.peer.take();
        let pool_id = channel.pool;
        let retire = channel.is_dedicated() || channel.interrupted;

        if let Some(client) = client {
            self.detach(client);
        }

        if retire {
            if let Some(channel) = self.channels.get_mut(id) {
                channel.interrupted = true;
            }
            self.channel_write(id, false);
            return;
        }

        let Some(pool) = pool_id.and_then(|pool_id| self.pools.get_mut(pool_id)) else {
            return;
        };

        let next = loop {
            match pool.pop_pending() {
                Some(client) => {
                    let alive = self
                        .channels
                        .get(client)
                        .map(|channel| !channel.disconnected)
                        .unwrap_or(false);
                    if alive {
                        break Some(client);
                    }
                }
                None => break None,
            }
        };

        match next {
            Some(client) => {
                if let Some(channel) = self.channels.get_mut(id) {
                    channel.buffer.compact();
                }
                self.pair(client, id);

                let needs_handshake = self
                    .channels
                    .get(client)
                    .map(|channel| channel.needs_handshake())
                    .unwrap_or(false);

                if needs_handshake {
                    self.send_handshake(client, id);
                } else {
                    self.channel_write(id, false);
                }
            }

            None => {
                pool.push_idle(id);
                self.stats.idle_backends.incr();
                if let Some(channel) = self.channels.get_mut(id) {
                    channel.buffer.compact();
                    channel.idle = true;
                    channel.last_activity = Instant::now();
                }
            }
        }
    }

    /// Client lost its backend after a finished transaction.
    fn detach(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.get_mut(id) else {
            return;
        };

        channel.peer = None;
        if channel.disconnected {
            return;
        }

        channel.idle = true;
        if let Some(pool) = channel.pool.and_then(|pool| self.pools.get_mut(pool)) {
            pool.n_idle_clients += 1;
        }
        self.stats.idle_clients.incr();

        // No readiness event is coming for bytes already read.
        if channel.has_unprocessed() || channel.buffer.pending() > 0 {
            self.wakeups.push_back(id);
        }
    }

    /// The backend's session state can't be trusted anymore,
    /// so it won't be shared again.
    pub(super) fn dedicate(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.get_mut(id) else {
            return;
        };
        let pool = channel.pool;
        let Some(state) = channel.backend_state() else {
            return;
        };

        if !state.dedicated {
            state.dedicated = true;
            if let Some(pool) = pool.and_then(|pool| self.pools.get_mut(pool)) {
                pool.n_dedicated += 1;
            }
            self.stats.dedicated_backends.incr();
        }
    }

    /// Mark a channel disconnected and queue it for removal.
    ///
    /// Its peer is released: backends are reused when they're idle and
    /// terminated otherwise, clients are told their backend went away.
    /// Calling this more than once for the same channel does nothing.
    pub(super) fn hangout(&mut self, id: ChannelId, reason: &str) {
        let Some(channel) = self.channels.get_mut(id) else {
            return;
        };

        if channel.disconnected {
            return;
        }

        channel.disconnected = true;
        channel.ready_for_query = false;
        let peer = channel.peer.take();
        let interrupted = channel.interrupted;
        let is_client = channel.is_client();
        let was_idle = std::mem::replace(&mut channel.idle, false);

        debug!("hangout {} [{}]", channel, reason);

        if let Some(pool) = channel.pool.and_then(|pool| self.pools.get_mut(pool)) {
            if is_client {
                pool.remove_pending(id);
                if was_idle {
                    pool.n_idle_clients = pool.n_idle_clients.saturating_sub(1);
                    self.stats.idle_clients.decr();
                }
            } else if pool.remove_idle(id) {
                self.stats.idle_backends.decr();
            }
        }

        self.hangout.push(id);

        let Some(peer) = peer else {
            return;
        };
        let Some(peer_channel) = self.channels.get_mut(peer) else {
            return;
        };
        peer_channel.peer = None;

        if is_client {
            if !interrupted {
                if peer_channel.ready_for_query {
                    self.reschedule(peer);
                } else {
                    // Client left in the middle of a request.
                    debug!("terminating {}, its client is gone", peer_channel);
                    peer_channel.interrupted = true;
                    self.channel_write(peer, false);
                }
            } else if !peer_channel.interrupted {
                self.reschedule(peer);
            }
        } else if !peer_channel.interrupted {
            report(&mut peer_channel.socket, ErrorResponse::backend_lost());
            self.hangout(peer, "backend lost");
        }
    }
}
