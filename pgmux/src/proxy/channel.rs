//! Client and backend connections as seen by the proxy.

use std::time::Instant;

use bytes::Bytes;

use crate::frontend::GucState;
use crate::net::{Buffer, Phase, Socket};

use super::ChannelId;

/// Index of a pool in the proxy's pool table.
pub type PoolId = usize;

#[derive(Debug, Default)]
pub struct ClientState {
    /// Replay script for `SET` commands and the requests sent that the
    /// backend hasn't answered with ReadyForQuery yet.
    pub guc: GucState,
    /// Client received the handshake of some backend.
    pub handshake_sent: bool,
    pub ssl_done: bool,
    pub gss_done: bool,
    pub user: String,
    pub database: String,
    pub application_name: Option<String>,
}

#[derive(Debug)]
pub struct BackendState {
    pub pid: i32,
    /// Replayed to clients that haven't seen a handshake yet.
    pub handshake: Bytes,
    /// Can't be shared anymore.
    pub dedicated: bool,
}

#[derive(Debug)]
pub enum Role {
    Client(ClientState),
    Backend(BackendState),
}

#[derive(Debug)]
pub struct Channel {
    pub socket: Socket,
    pub buffer: Buffer,
    pub role: Role,
    pub peer: Option<ChannelId>,
    pub pool: Option<PoolId>,
    pub ready_for_query: bool,
    pub interrupted: bool,
    pub disconnected: bool,
    pub idle: bool,
    pub in_transaction: bool,
    pub last_activity: Instant,
}

impl Channel {
    fn new(socket: Socket, role: Role, pool: Option<PoolId>) -> Self {
        Self {
            socket,
            buffer: Buffer::default(),
            role,
            peer: None,
            pool,
            ready_for_query: false,
            interrupted: false,
            disconnected: false,
            idle: false,
            in_transaction: false,
            last_activity: Instant::now(),
        }
    }

    /// Accepted client, not routed yet.
    pub fn client(socket: Socket) -> Self {
        Self::new(socket, Role::Client(ClientState::default()), None)
    }

    pub fn backend(socket: Socket, pid: i32, handshake: Bytes, pool: PoolId) -> Self {
        Self::new(
            socket,
            Role::Backend(BackendState {
                pid,
                handshake,
                dedicated: false,
            }),
            Some(pool),
        )
    }

    pub fn is_client(&self) -> bool {
        matches!(self.role, Role::Client(_))
    }

    pub fn is_backend(&self) -> bool {
        matches!(self.role, Role::Backend(_))
    }

    pub fn client_state(&mut self) -> Option<&mut ClientState> {
        match self.role {
            Role::Client(ref mut state) => Some(state),
            Role::Backend(_) => None,
        }
    }

    pub fn backend_state(&mut self) -> Option<&mut BackendState> {
        match self.role {
            Role::Backend(ref mut state) => Some(state),
            Role::Client(_) => None,
        }
    }

    /// Backend marked as not shareable.
    pub fn is_dedicated(&self) -> bool {
        matches!(self.role, Role::Backend(BackendState { dedicated: true, .. }))
    }

    /// Backend process id, zero for clients.
    pub fn pid(&self) -> i32 {
        match self.role {
            Role::Backend(ref state) => state.pid,
            Role::Client(_) => 0,
        }
    }

    /// Framing of the next message read from this channel.
    pub fn phase(&self) -> Phase {
        if self.is_client() && self.pool.is_none() {
            Phase::Startup
        } else {
            Phase::Steady
        }
    }

    /// Client still waiting for its first handshake.
    pub fn needs_handshake(&self) -> bool {
        matches!(
            self.role,
            Role::Client(ClientState {
                handshake_sent: false,
                ..
            })
        )
    }

    /// Bytes buffered but not yet looked at.
    pub fn has_unprocessed(&self) -> bool {
        self.buffer.filled_len() > self.buffer.staged()
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.role {
            Role::Client(ref state) if self.pool.is_some() => write!(
                f,
                "client {}@{} [{}]",
                state.user,
                state.database,
                self.socket.peer()
            ),
            Role::Client(_) => write!(f, "client [{}]", self.socket.peer()),
            Role::Backend(ref state) => write!(f, "backend [pid: {}]", state.pid),
        }
    }
}
