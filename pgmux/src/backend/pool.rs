//! Session pool.
//!
//! Backends and waiting clients of one (database, user) pair. The pool
//! only keeps track of who is waiting and what's idle; pairing channels
//! and moving bytes is done by the proxy.

use std::collections::VecDeque;
use std::fmt::Display;

use tracing::info;

use super::LaunchRequest;
use crate::proxy::ChannelId;

/// Pools are keyed by database and user. The user is empty
/// in multi-tenant mode, where roles share backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PoolKey {
    pub database: String,
    pub user: String,
}

impl PoolKey {
    pub fn new(database: &str, user: &str) -> Self {
        Self {
            database: database.to_string(),
            user: user.to_string(),
        }
    }
}

impl Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.database, self.user)
    }
}

#[derive(Debug, Default)]
pub struct SessionPool {
    key: PoolKey,
    /// Most recently used first.
    idle_backends: VecDeque<ChannelId>,
    /// Served in arrival order.
    pending_clients: VecDeque<ChannelId>,
    /// Backends started and not yet removed.
    pub n_launched: usize,
    /// Backends that can't be returned to the idle list.
    pub n_dedicated: usize,
    pub n_connected_clients: usize,
    pub n_idle_clients: usize,
    pub n_transactions: u64,
    cmdline_options: Option<String>,
    startup_options: Vec<(String, String)>,
}

impl SessionPool {
    pub fn new(key: PoolKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Put a backend on the idle list. It will be the next one used.
    pub fn push_idle(&mut self, backend: ChannelId) {
        self.idle_backends.push_front(backend);
    }

    pub fn pop_idle(&mut self) -> Option<ChannelId> {
        self.idle_backends.pop_front()
    }

    pub fn remove_idle(&mut self, backend: ChannelId) -> bool {
        remove(&mut self.idle_backends, backend)
    }

    pub fn idle(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.idle_backends.iter().copied()
    }

    pub fn n_idle_backends(&self) -> usize {
        self.idle_backends.len()
    }

    /// Queue a client until a backend is free.
    pub fn push_pending(&mut self, client: ChannelId) {
        self.pending_clients.push_back(client);
    }

    pub fn pop_pending(&mut self) -> Option<ChannelId> {
        self.pending_clients.pop_front()
    }

    pub fn remove_pending(&mut self, client: ChannelId) -> bool {
        remove(&mut self.pending_clients, client)
    }

    pub fn n_pending(&self) -> usize {
        self.pending_clients.len()
    }

    /// Another backend may be started.
    pub fn can_launch(&self, pool_size: usize) -> bool {
        self.n_launched < pool_size
    }

    /// Record the startup options backends will be started with.
    ///
    /// All clients of a pool are expected to connect with the same options.
    /// They are taken from whichever client connects while the pool has
    /// no shareable backends; after that, differing options are logged and ignored.
    pub fn capture_options(
        &mut self,
        cmdline_options: Option<&str>,
        startup_options: &[(String, String)],
        application_name: Option<&str>,
    ) -> bool {
        if self.n_launched == self.n_dedicated {
            self.cmdline_options = cmdline_options.map(|o| o.to_string());
            self.startup_options = startup_options.to_vec();
            true
        } else {
            if self.cmdline_options.as_deref() != cmdline_options
                || self.startup_options != startup_options
            {
                info!(
                    "ignoring startup options of client {} [{}]",
                    application_name.unwrap_or("unknown"),
                    self.key
                );
            }
            false
        }
    }

    /// What to start the next backend with.
    pub fn launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            database: self.key.database.clone(),
            user: self.key.user.clone(),
            cmdline_options: self.cmdline_options.clone(),
            startup_options: self.startup_options.clone(),
        }
    }
}

fn remove(list: &mut VecDeque<ChannelId>, id: ChannelId) -> bool {
    if let Some(pos) = list.iter().position(|entry| *entry == id) {
        list.remove(pos);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(index: u32) -> ChannelId {
        ChannelId::new(index, 1)
    }

    #[test]
    fn test_idle_backends_are_lifo() {
        let mut pool = SessionPool::new(PoolKey::new("app", "svc"));
        pool.push_idle(id(1));
        pool.push_idle(id(2));
        pool.push_idle(id(3));

        assert!(pool.remove_idle(id(2)));
        assert!(!pool.remove_idle(id(2)));
        assert_eq!(pool.pop_idle(), Some(id(3)));
        assert_eq!(pool.pop_idle(), Some(id(1)));
        assert_eq!(pool.pop_idle(), None);
    }

    #[test]
    fn test_pending_clients_are_fifo() {
        let mut pool = SessionPool::new(PoolKey::new("app", "svc"));
        for i in 1..=3 {
            pool.push_pending(id(i));
        }
        assert!(pool.remove_pending(id(2)));
        assert_eq!(pool.n_pending(), 2);
        assert_eq!(pool.pop_pending(), Some(id(1)));
        assert_eq!(pool.pop_pending(), Some(id(3)));
    }

    #[test]
    fn test_capture_options() {
        let mut pool = SessionPool::new(PoolKey::new("app", "svc"));
        let options = vec![("DateStyle".to_string(), "ISO".to_string())];
        assert!(pool.capture_options(Some("-c work_mem=1MB"), &options, None));

        pool.n_launched = 1;
        assert!(!pool.capture_options(None, &[], Some("psql")));

        let request = pool.launch_request();
        assert_eq!(request.database, "app");
        assert_eq!(request.user, "svc");
        assert_eq!(request.cmdline_options.as_deref(), Some("-c work_mem=1MB"));
        assert_eq!(request.startup_options, options);

        // Only dedicated backends left, options can change again.
        pool.n_dedicated = 1;
        assert!(pool.capture_options(None, &[], None));
        assert!(pool.launch_request().startup_options.is_empty());
    }
}
