//! Reading from channels.
//!
//! Bytes are read into the channel's own buffer and scanned for complete
//! messages. Whole messages are staged for the peer and stay in the buffer
//! until the peer's socket took all of them; reading from a channel stops
//! while it has staged bytes that weren't sent yet.

use std::io::{ErrorKind, Read, Write};

use tracing::{debug, trace, warn};

use super::{report, Channel, ChannelId, Proxy, Role};
use crate::frontend::{Encryption, StartupRequest};
use crate::net::messages::{
    BackendTag, EncryptionReply, ErrorResponse, FrontendTag, Query, ReadyForQuery, ToBytes,
    TransactionState,
};
use crate::net::{would_block, Frame, Phase, Socket};

/// What scanning a channel's buffer turned up.
enum Scan {
    /// Messages up to this offset can go to the peer.
    Forward(usize),
    /// Startup packet accepted, the client is waiting for a handshake.
    Handshake,
    /// Scan again without reading.
    Again,
    /// Not even one complete message.
    Incomplete,
    /// The channel was dealt with.
    Done,
}

impl Proxy {
    /// Read from a channel and pass complete messages to its peer.
    /// Returns false when nothing more can happen until the next event.
    pub(super) fn channel_read(&mut self, id: ChannelId) -> bool {
        loop {
            let Some(channel) = self.channels.get(id) else {
                return false;
            };

            if channel.disconnected {
                return false;
            }

            if channel.buffer.pending() > 0 {
                // Detached with part of a request still staged.
                if channel.is_client() && channel.peer.is_none() && channel.idle {
                    if !self.resume(id) {
                        return false;
                    }
                    continue;
                }
                return true;
            }

            let scan = match channel.phase() {
                Phase::Startup => self.scan_startup(id),
                Phase::Steady => self.scan_messages(id),
            };

            match scan {
                Scan::Done => return false,
                Scan::Again => continue,
                Scan::Incomplete => {
                    if !self.fill(id) {
                        return false;
                    }
                }
                Scan::Handshake => return self.handshake(id),
                Scan::Forward(end) => {
                    if !self.forward(id, end) {
                        return false;
                    }

                    let ready = self
                        .channels
                        .get(id)
                        .map(|channel| channel.is_backend() && channel.ready_for_query)
                        .unwrap_or(false);
                    if ready {
                        self.ready.push_back(id);
                        return true;
                    }
                }
            }
        }
    }

    /// Read whatever the socket has. Returns false if it had nothing.
    fn fill(&mut self, id: ChannelId) -> bool {
        loop {
            let Some(channel) = self.channels.get_mut(id) else {
                return false;
            };

            if channel.buffer.spare().is_empty() {
                let capacity = channel.buffer.capacity();
                channel.buffer.grow_to(capacity * 2);
            }

            match channel.socket.read(channel.buffer.spare()) {
                Ok(0) => {
                    debug!("{} closed the connection", channel);
                    self.hangout(id, "read");
                    return false;
                }

                Ok(n) => {
                    channel.buffer.advance(n);
                    trace!("{} bytes <= {}", n, channel);
                    return true;
                }

                Err(err) if err.kind() == ErrorKind::Interrupted => continue,

                Err(err) if would_block(&err) => return false,

                Err(err) => {
                    debug!("read from {} failed: {}", channel, err);
                    self.hangout(id, "read");
                    return false;
                }
            }
        }
    }

    fn scan_startup(&mut self, id: ChannelId) -> Scan {
        let Some(channel) = self.channels.get_mut(id) else {
            return Scan::Done;
        };

        let len = match self.scanner.scan(channel.buffer.filled(), 0, Phase::Startup) {
            Ok(Frame::Complete(len)) => len,
            Ok(Frame::Partial(_)) => return Scan::Incomplete,
            Err(err) => {
                debug!("{}: {}", channel, err);
                self.hangout(id, "startup");
                return Scan::Done;
            }
        };

        let (ssl_done, gss_done) = match channel.role {
            Role::Client(ref state) => (state.ssl_done, state.gss_done),
            Role::Backend(_) => return Scan::Done,
        };

        let request = self
            .negotiator
            .parse(&channel.buffer.filled()[..len], ssl_done, gss_done);

        match request {
            Ok(StartupRequest::Cancel { pid, .. }) => {
                debug!("ignoring cancel request for pid {}", pid);
                self.hangout(id, "cancel");
                Scan::Done
            }

            Ok(StartupRequest::Ssl) => self.encrypt(id, Encryption::Ssl, len),

            Ok(StartupRequest::GssEnc) => self.encrypt(id, Encryption::Gss, len),

            Ok(StartupRequest::Startup(params)) => {
                channel.buffer.consume(len);

                if let Some(ref negotiate) = params.negotiate {
                    let sent = negotiate
                        .to_bytes()
                        .map_err(std::io::Error::other)
                        .and_then(|bytes| channel.socket.write_all(&bytes));
                    if let Err(err) = sent {
                        debug!("couldn't negotiate protocol version with {}: {}", channel, err);
                        self.hangout(id, "negotiate");
                        return Scan::Done;
                    }
                }

                self.client_connect(id, params);
                Scan::Handshake
            }

            Err(err) => {
                match err.response() {
                    Some(response) => self.reject(id, response),
                    None => {
                        debug!("bad startup packet: {}", err);
                        self.hangout(id, "startup");
                    }
                }
                Scan::Done
            }
        }
    }

    /// Answer SSLRequest or GSSENCRequest, and hand the socket
    /// to the transport if it can do the encryption.
    fn encrypt(&mut self, id: ChannelId, kind: Encryption, len: usize) -> Scan {
        let supported = self.transport.supports(kind);

        let Some(channel) = self.channels.get_mut(id) else {
            return Scan::Done;
        };

        channel.buffer.consume(len);
        if let Some(state) = channel.client_state() {
            match kind {
                Encryption::Ssl => state.ssl_done = true,
                Encryption::Gss => state.gss_done = true,
            }
        }

        let reply = match (supported, kind) {
            (true, Encryption::Ssl) => EncryptionReply::Ssl,
            (true, Encryption::Gss) => EncryptionReply::Gss,
            (false, _) => EncryptionReply::No,
        };

        if let Err(err) = channel.socket.write_all(&[reply.byte()]) {
            debug!("couldn't answer encryption request from {}: {}", channel, err);
            self.hangout(id, "encrypt");
            return Scan::Done;
        }

        if !supported {
            return Scan::Again;
        }

        // Anything that came with the request was sent in plain text.
        if channel.buffer.filled_len() > 0 {
            self.reject(
                id,
                ErrorResponse::protocol_violation("received unencrypted data after encryption request"),
            );
            return Scan::Done;
        }

        if let Err(err) = self.poller.deregister(&channel.socket) {
            debug!("deregister {}: {}", channel, err);
        }

        let socket = std::mem::replace(&mut channel.socket, Socket::DevNull);

        let stream = match self.transport.accept(kind, socket) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("{:?} handshake failed: {}", kind, err);
                self.hangout(id, "handshake");
                return Scan::Done;
            }
        };

        let Some(channel) = self.channels.get_mut(id) else {
            return Scan::Done;
        };
        channel.socket = Socket::Secure(stream);
        self.stats.ssl_clients.incr();

        if let Err(err) = self.poller.register(&channel.socket, id.token()) {
            warn!("couldn't watch encrypted socket: {}", err);
            self.hangout(id, "register");
            return Scan::Done;
        }

        Scan::Again
    }

    /// Look at every complete message that hasn't been staged yet.
    fn scan_messages(&mut self, id: ChannelId) -> Scan {
        let Some(channel) = self.channels.get(id) else {
            return Scan::Done;
        };

        let start = channel.buffer.staged();
        let mut offset = start;

        loop {
            let Some(channel) = self.channels.get_mut(id) else {
                return Scan::Done;
            };

            let len = match self.scanner.scan(channel.buffer.filled(), offset, Phase::Steady) {
                Ok(Frame::Complete(len)) => len,

                Ok(Frame::Partial(total)) => {
                    if let Some(total) = total {
                        channel.buffer.grow_to(offset + total);
                    }
                    break;
                }

                Err(err) => {
                    if channel.is_client() {
                        self.reject(id, ErrorResponse::protocol_violation(err));
                    } else {
                        warn!("{} sent a malformed message: {}", channel, err);
                        self.hangout(id, "protocol");
                    }
                    return Scan::Done;
                }
            };

            let len = if channel.is_backend() {
                self.backend_message(id, offset, len);
                len
            } else {
                match self.client_message(id, offset, len, offset == start) {
                    Some(len) => len,
                    None => return Scan::Done,
                }
            };

            offset += len;
        }

        if offset > start {
            Scan::Forward(offset)
        } else {
            Scan::Incomplete
        }
    }

    /// Watch what the backend says about transaction state and errors.
    fn backend_message(&mut self, id: ChannelId, offset: usize, len: usize) {
        let Some(channel) = self.channels.get(id) else {
            return;
        };

        let message = &channel.buffer.filled()[offset..offset + len];
        let peer = channel.peer;
        let pool = channel.pool;

        match BackendTag::from(message[0]) {
            BackendTag::ReadyForQuery => {
                let status = ReadyForQuery::peek(message);
                let idle = status == Some(TransactionState::Idle);
                let mut outstanding = 0;

                if let Some(client) = peer.and_then(|peer| self.channels.get_mut(peer)) {
                    if let Some(state) = client.client_state() {
                        state.guc.answered();
                        outstanding = state.guc.in_flight();
                    }
                    if idle && outstanding == 0 {
                        client.in_transaction = false;
                    }
                }

                if idle && outstanding == 0 {
                    if let Some(channel) = self.channels.get_mut(id) {
                        channel.ready_for_query = true;
                    }
                    if let Some(pool) = pool.and_then(|pool| self.pools.get_mut(pool)) {
                        pool.n_transactions += 1;
                    }
                    self.stats.transactions.incr();
                }
            }

            BackendTag::ErrorResponse => {
                let client = peer.and_then(|peer| self.channels.get_mut(peer));
                if let Some(client) = client {
                    if let Some(state) = client.client_state() {
                        if state.guc.undo() {
                            debug!("statement failed, dropped its SET from replay script");
                        }
                    }
                }
            }

            _ => (),
        }
    }

    /// Track requests and rewrite simple queries for GUC replay.
    /// Returns the length of the message as it now is in the buffer,
    /// or nothing if the client is gone.
    fn client_message(
        &mut self,
        id: ChannelId,
        offset: usize,
        len: usize,
        first: bool,
    ) -> Option<usize> {
        let channel = self.channels.get_mut(id)?;
        let tag = channel.buffer.filled()[offset];

        match FrontendTag::from(tag) {
            FrontendTag::Query => {
                let Channel {
                    buffer,
                    role,
                    in_transaction,
                    ..
                } = channel;
                let Role::Client(state) = role else {
                    return Some(len);
                };

                if *in_transaction {
                    state.guc.request();
                    return Some(len);
                }

                let text = Query::text(&buffer.filled()[offset..offset + len]);
                match state.guc.on_query(text, in_transaction) {
                    Some(rewritten) => {
                        let message = query_message(&rewritten);
                        trace!("rewritten: {}", String::from_utf8_lossy(&rewritten));
                        buffer.splice(offset, offset + len, &message);
                        Some(message.len())
                    }
                    None => Some(len),
                }
            }

            FrontendTag::Sync | FrontendTag::FunctionCall => {
                if let Some(state) = channel.client_state() {
                    state.guc.request();
                }
                Some(len)
            }

            FrontendTag::Terminate => {
                channel.interrupted = true;

                let Some(backend) = channel.peer else {
                    self.hangout(id, "terminate");
                    return None;
                };

                let ready = self
                    .channels
                    .get(backend)
                    .map(|backend| backend.ready_for_query)
                    .unwrap_or(false);

                // Nothing for the backend to finish.
                if ready && first {
                    self.hangout(id, "terminate");
                    return None;
                }

                self.dedicate(backend);
                Some(len)
            }

            FrontendTag::Unknown(tag) => {
                warn!("{} sent unknown message '{}'", channel, tag as char);
                Some(len)
            }

            _ => Some(len),
        }
    }

    /// Stage messages up to `end` and pass them on.
    fn forward(&mut self, id: ChannelId, end: usize) -> bool {
        let Some(channel) = self.channels.get_mut(id) else {
            return false;
        };

        channel.buffer.stage(end);

        match channel.peer {
            Some(peer) => self.channel_write(peer, true),

            None if channel.is_backend() => {
                debug!("{} sent data while idle", channel);
                self.hangout(id, "idle");
                false
            }

            None => self.resume(id),
        }
    }

    /// Get a backend for a client with a staged request and send it.
    fn resume(&mut self, id: ChannelId) -> bool {
        self.client_attach(id);

        match self.channels.get(id).and_then(|channel| channel.peer) {
            Some(backend) => self.channel_write(backend, true),
            // Waiting for a backend.
            None => false,
        }
    }

    /// Send a handshake to a freshly routed client, if a backend is free.
    fn handshake(&mut self, id: ChannelId) -> bool {
        self.client_attach(id);

        match self.channels.get(id).and_then(|channel| channel.peer) {
            Some(backend) => self.send_handshake(id, backend),
            None => false,
        }
    }

    /// Tell the client why it's being disconnected and drop it.
    pub(super) fn reject(&mut self, id: ChannelId, error: ErrorResponse) {
        if let Some(channel) = self.channels.get_mut(id) {
            warn!("{}: {}", channel, error.message);
            report(&mut channel.socket, error);
        }
        self.hangout(id, "rejected");
    }
}

/// Query message with this text.
fn query_message(text: &[u8]) -> Vec<u8> {
    let len = (text.len() + 5) as i32;
    let mut message = Vec::with_capacity(text.len() + 6);
    message.push(b'Q');
    message.extend_from_slice(&len.to_be_bytes());
    message.extend_from_slice(text);
    message.push(0);
    message
}
