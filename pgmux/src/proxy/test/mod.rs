//! Engine scenarios over socket pairs.
//!
//! Each test drives a real proxy one poll at a time. Clients and backends
//! are `UnixStream` pairs: the proxy owns one end, the test reads and writes
//! the other, playing the part of the client application or the server.

use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use pgmux_stats::ProxyCounters;

use super::*;
use crate::backend::{Error as BackendError, LaunchRequest, Launched, Launcher, PoolKey};
use crate::frontend::Plaintext;
use crate::net::messages::{
    Authentication, BackendKeyData, ErrorResponse, FromBytes, Query, ReadyForQuery,
    StartupPacket, ToBytes,
};
use crate::net::Event;

const TIMEOUT: Duration = Duration::from_secs(1);

/// Server ends of every backend the proxy started.
#[derive(Debug, Clone, Default)]
struct Backends {
    streams: Arc<Mutex<Vec<UnixStream>>>,
    requests: Arc<Mutex<Vec<LaunchRequest>>>,
    fail: Arc<AtomicBool>,
}

#[derive(Debug)]
struct MockLauncher {
    backends: Backends,
    pid: i32,
}

impl Launcher for MockLauncher {
    fn launch(&mut self, request: &LaunchRequest) -> Result<Launched, BackendError> {
        if self.backends.fail.load(Ordering::Relaxed) {
            return Err(BackendError::Io(std::io::Error::new(
                ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        self.pid += 1;
        let (ours, theirs) = UnixStream::pair()?;
        theirs.set_read_timeout(Some(TIMEOUT))?;
        self.backends.streams.lock().push(theirs);
        self.backends.requests.lock().push(request.clone());

        Ok(Launched {
            socket: Socket::Unix(ours),
            handshake: handshake(self.pid),
        })
    }
}

fn handshake(pid: i32) -> Bytes {
    let mut bytes = BytesMut::new();
    bytes.put(Authentication::Ok.to_bytes().unwrap());
    bytes.put(BackendKeyData { pid, secret: 7 }.to_bytes().unwrap());
    bytes.put(ReadyForQuery::idle().to_bytes().unwrap());
    bytes.freeze()
}

fn startup(params: &[(&str, &str)]) -> Bytes {
    params
        .iter()
        .fold(StartupPacket::new(), |packet, (name, value)| {
            packet.param(name, value)
        })
        .to_bytes()
        .unwrap()
}

fn query(text: &str) -> Bytes {
    Query::new(text).to_bytes().unwrap()
}

fn command_complete(tag: &str) -> Vec<u8> {
    let mut message = vec![b'C'];
    message.extend_from_slice(&((tag.len() + 5) as i32).to_be_bytes());
    message.extend_from_slice(tag.as_bytes());
    message.push(0);
    message
}

/// Backend answer to one simple query.
fn reply(tag: &str, in_transaction: bool) -> Vec<u8> {
    let mut bytes = command_complete(tag);
    bytes.extend(ReadyForQuery::in_transaction(in_transaction).to_bytes().unwrap());
    bytes
}

fn error_reply() -> Vec<u8> {
    let mut bytes = ErrorResponse {
        code: "22023".into(),
        message: "invalid value for parameter".into(),
        ..Default::default()
    }
    .to_bytes()
    .unwrap()
    .to_vec();
    bytes.extend(ReadyForQuery::idle().to_bytes().unwrap());
    bytes
}

/// Read one tagged message, whole.
fn read_message(stream: &mut UnixStream) -> Bytes {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).unwrap();
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut message = vec![0u8; len + 1];
    message[..5].copy_from_slice(&header);
    stream.read_exact(&mut message[5..]).unwrap();
    Bytes::from(message)
}

fn read_query(stream: &mut UnixStream) -> String {
    let message = read_message(stream);
    assert_eq!(message[0], b'Q');
    String::from_utf8_lossy(Query::text(&message)).to_string()
}

fn read_error(stream: &mut UnixStream) -> ErrorResponse {
    let message = read_message(stream);
    assert_eq!(message[0], b'E', "expected an error");
    ErrorResponse::from_bytes(message).unwrap()
}

fn read_handshake(stream: &mut UnixStream, pid: i32) {
    let expected = handshake(pid);
    let mut bytes = vec![0u8; expected.len()];
    stream.read_exact(&mut bytes).unwrap();
    assert_eq!(&bytes[..], &expected[..]);
}

fn assert_closed(stream: &mut UnixStream) {
    let mut byte = [0u8; 1];
    assert_eq!(stream.read(&mut byte).unwrap(), 0);
}

struct Harness {
    proxy: Proxy,
    backends: Backends,
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| ())
    }

    fn with(configure: impl FnOnce(&mut ProxySettings)) -> Self {
        let mut settings = ProxySettings::default();
        configure(&mut settings);

        let backends = Backends::default();
        let launcher = MockLauncher {
            backends: backends.clone(),
            pid: 0,
        };

        let proxy = Proxy::new(
            settings,
            Box::new(launcher),
            Box::new(Plaintext),
            Arc::new(ProxyCounters::default()),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        Self { proxy, backends }
    }

    fn try_connect(&mut self) -> (Option<ChannelId>, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_read_timeout(Some(TIMEOUT)).unwrap();
        (self.proxy.add_client(Socket::Unix(theirs)), ours)
    }

    fn connect(&mut self) -> (ChannelId, UnixStream) {
        let (id, stream) = self.try_connect();
        (id.unwrap(), stream)
    }

    /// Connected client that got the handshake of backend `pid`.
    fn login(&mut self, user: &str, database: &str, pid: i32) -> UnixStream {
        let (_, mut client) = self.connect();
        client
            .write_all(&startup(&[("user", user), ("database", database)]))
            .unwrap();
        self.spin();
        read_handshake(&mut client, pid);
        client
    }

    fn spin(&mut self) {
        for _ in 0..5 {
            self.proxy.poll(Duration::from_millis(10)).unwrap();
        }
    }

    /// Server end of the n-th backend started.
    fn backend(&self, n: usize) -> UnixStream {
        self.backends.streams.lock()[n].try_clone().unwrap()
    }

    fn launched(&self) -> usize {
        self.backends.streams.lock().len()
    }

    fn pool(&self, database: &str, user: &str) -> &SessionPool {
        self.proxy
            .find_pool(&PoolKey::new(database, user))
            .unwrap()
    }

    fn stats(&self) -> pgmux_stats::ProxyState {
        self.proxy.stats().snapshot()
    }
}

#[test]
fn test_first_client_gets_new_backend() {
    let mut harness = Harness::new();
    let _client = harness.login("svc", "app", 1);

    assert_eq!(harness.launched(), 1);
    let request = harness.backends.requests.lock()[0].clone();
    assert_eq!(request.database, "app");
    assert_eq!(request.user, "svc");

    let pool = harness.pool("app", "svc");
    assert_eq!(pool.n_launched, 1);
    assert_eq!(pool.n_idle_backends(), 1);
    assert_eq!(pool.n_connected_clients, 1);
    assert_eq!(pool.n_idle_clients, 1);

    let stats = harness.stats();
    assert_eq!(stats.clients, 1);
    assert_eq!(stats.backends, 1);
    assert_eq!(stats.pools, 1);
    assert_eq!(stats.idle_backends, 1);
    assert_eq!(stats.idle_clients, 1);
}

#[test]
fn test_backend_returns_to_pool_after_transaction() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    client.write_all(&query("SELECT 1")).unwrap();
    harness.spin();
    assert_eq!(read_query(&mut backend), "SELECT 1");
    assert_eq!(harness.pool("app", "svc").n_idle_backends(), 0);
    assert_eq!(harness.stats().idle_clients, 0);

    backend.write_all(&reply("SELECT 1", false)).unwrap();
    harness.spin();
    assert_eq!(read_message(&mut client)[0], b'C');
    assert_eq!(read_message(&mut client)[0], b'Z');

    let pool = harness.pool("app", "svc");
    assert_eq!(pool.n_idle_backends(), 1);
    assert_eq!(pool.n_idle_clients, 1);
    assert_eq!(pool.n_transactions, 1);

    let stats = harness.stats();
    assert_eq!(stats.transactions, 1);
    assert_eq!(stats.idle_backends, 1);
    assert_eq!(stats.idle_clients, 1);
    assert!(stats.tx_bytes > 0);
    assert_eq!(stats.rx_bytes, query("SELECT 1").len() as u64);
}

#[test]
fn test_idle_backend_is_reused() {
    let mut harness = Harness::new();
    let _first = harness.login("svc", "app", 1);
    let _second = harness.login("svc", "app", 1);

    assert_eq!(harness.launched(), 1);
    assert_eq!(harness.stats().clients, 2);
    assert_eq!(harness.pool("app", "svc").n_connected_clients, 2);
}

#[test]
fn test_pools_are_keyed_by_database_and_user() {
    let mut harness = Harness::new();
    let _first = harness.login("svc", "app", 1);
    let _second = harness.login("admin", "app", 2);

    assert_eq!(harness.launched(), 2);
    assert_eq!(harness.stats().pools, 2);
    assert_eq!(harness.pool("app", "admin").n_launched, 1);
}

#[test]
fn test_pending_clients_served_in_order() {
    let mut harness = Harness::with(|settings| settings.session_pool_size = 1);
    let mut holder = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    holder.write_all(&query("BEGIN")).unwrap();
    harness.spin();
    assert_eq!(read_query(&mut backend), "BEGIN");
    backend.write_all(&reply("BEGIN", true)).unwrap();
    harness.spin();
    read_message(&mut holder);
    read_message(&mut holder);

    // Both send a query right after the startup packet.
    let mut waiting = vec![];
    for name in ["b", "c"] {
        let (_, mut client) = harness.connect();
        let mut bytes = startup(&[("user", "svc"), ("database", "app")]).to_vec();
        bytes.extend(query(&format!("SELECT '{}'", name)));
        client.write_all(&bytes).unwrap();
        waiting.push(client);
        harness.spin();
    }
    assert_eq!(harness.pool("app", "svc").n_pending(), 2);
    assert_eq!(harness.launched(), 1);

    holder.write_all(&query("COMMIT")).unwrap();
    harness.spin();
    assert_eq!(read_query(&mut backend), "COMMIT");
    backend.write_all(&reply("COMMIT", false)).unwrap();
    harness.spin();
    read_message(&mut holder);
    read_message(&mut holder);

    read_handshake(&mut waiting[0], 1);
    read_handshake(&mut waiting[1], 1);

    assert_eq!(read_query(&mut backend), "SELECT 'b'");
    backend.write_all(&reply("SELECT 1", false)).unwrap();
    harness.spin();
    assert_eq!(read_message(&mut waiting[0])[0], b'C');

    assert_eq!(read_query(&mut backend), "SELECT 'c'");
    backend.write_all(&reply("SELECT 1", false)).unwrap();
    harness.spin();
    assert_eq!(read_message(&mut waiting[1])[0], b'C');

    let pool = harness.pool("app", "svc");
    assert_eq!(pool.n_pending(), 0);
    assert_eq!(pool.n_idle_backends(), 1);
    assert_eq!(harness.launched(), 1);
}

#[test]
fn test_pipelined_queries_keep_backend() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    let mut bytes = query("SELECT 1").to_vec();
    bytes.extend(query("SELECT 2"));
    client.write_all(&bytes).unwrap();
    harness.spin();
    assert_eq!(read_query(&mut backend), "SELECT 1");
    assert_eq!(read_query(&mut backend), "SELECT 2");

    backend.write_all(&reply("SELECT 1", false)).unwrap();
    harness.spin();
    assert_eq!(harness.pool("app", "svc").n_idle_backends(), 0);

    backend.write_all(&reply("SELECT 1", false)).unwrap();
    harness.spin();
    assert_eq!(harness.pool("app", "svc").n_idle_backends(), 1);
    assert_eq!(harness.stats().transactions, 1);
}

#[test]
fn test_set_is_replayed() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    client
        .write_all(&query("SET statement_timeout = '5s';"))
        .unwrap();
    harness.spin();
    assert_eq!(
        read_query(&mut backend),
        "set local statement_timeout = '5s';\nset local statement_timeout = '5s';\n"
    );
    backend.write_all(&reply("SET", false)).unwrap();
    harness.spin();
    read_message(&mut client);
    read_message(&mut client);

    client.write_all(&query("SELECT 1;")).unwrap();
    harness.spin();
    assert_eq!(
        read_query(&mut backend),
        "set local statement_timeout = '5s';\nSELECT 1;"
    );
}

#[test]
fn test_failed_set_is_forgotten() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    client.write_all(&query("SET work_mem = 'lots'")).unwrap();
    harness.spin();
    read_query(&mut backend);
    backend.write_all(&error_reply()).unwrap();
    harness.spin();
    assert_eq!(read_message(&mut client)[0], b'E');
    assert_eq!(read_message(&mut client)[0], b'Z');

    client.write_all(&query("SELECT 1")).unwrap();
    harness.spin();
    assert_eq!(read_query(&mut backend), "SELECT 1");
}

#[test]
fn test_set_with_trailing_comment() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    client
        .write_all(&query("SET search_path = app -- tenant schema"))
        .unwrap();
    harness.spin();
    read_query(&mut backend);
    backend.write_all(&reply("SET", false)).unwrap();
    harness.spin();
    read_message(&mut client);
    read_message(&mut client);

    client.write_all(&query("INSERT INTO t VALUES (1)")).unwrap();
    harness.spin();
    let sent = read_query(&mut backend);
    assert_eq!(
        sent,
        "set local search_path = app -- tenant schema\n;INSERT INTO t VALUES (1)"
    );
    assert!(!sent.lines().last().unwrap().contains("--"));
}

#[test]
fn test_failed_pipelined_set_is_forgotten() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    let mut bytes = query("SET work_mem = 'lots';").to_vec();
    bytes.extend(query("SELECT 1;"));
    client.write_all(&bytes).unwrap();
    harness.spin();
    read_query(&mut backend);
    read_query(&mut backend);

    let mut answers = error_reply();
    answers.extend(error_reply());
    backend.write_all(&answers).unwrap();
    harness.spin();
    for _ in 0..2 {
        assert_eq!(read_message(&mut client)[0], b'E');
        assert_eq!(read_message(&mut client)[0], b'Z');
    }

    client.write_all(&query("SELECT 2;")).unwrap();
    harness.spin();
    assert_eq!(read_query(&mut backend), "SELECT 2;");
}

#[test]
fn test_statements_in_transaction_pass_through() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    client.write_all(&query("SET search_path = app;")).unwrap();
    harness.spin();
    read_query(&mut backend);
    backend.write_all(&reply("SET", false)).unwrap();
    harness.spin();
    read_message(&mut client);
    read_message(&mut client);

    client.write_all(&query("BEGIN")).unwrap();
    harness.spin();
    assert_eq!(
        read_query(&mut backend),
        "BEGIN\n;set local search_path = app;\n"
    );
    backend.write_all(&reply("BEGIN", true)).unwrap();
    harness.spin();
    read_message(&mut client);
    read_message(&mut client);

    client.write_all(&query("SELECT 1")).unwrap();
    harness.spin();
    assert_eq!(read_query(&mut backend), "SELECT 1");
}

#[test]
fn test_multi_tenant_role_replay() {
    let mut harness = Harness::with(|settings| settings.multi_tenant = true);
    let mut client = harness.login("alice", "app", 1);
    let mut backend = harness.backend(0);

    assert_eq!(harness.backends.requests.lock()[0].user, "");
    assert_eq!(harness.pool("app", "").n_connected_clients, 1);

    client.write_all(&query("SELECT 1")).unwrap();
    harness.spin();
    assert_eq!(read_query(&mut backend), "set local role \"alice\";SELECT 1");
}

#[test]
fn test_startup_options() {
    let mut harness = Harness::new();
    let (_, mut client) = harness.connect();
    client
        .write_all(&startup(&[
            ("user", "svc"),
            ("database", "app"),
            ("DateStyle", "ISO"),
        ]))
        .unwrap();
    harness.spin();
    read_handshake(&mut client, 1);

    let request = harness.backends.requests.lock()[0].clone();
    assert_eq!(
        request.startup_options,
        vec![("DateStyle".to_string(), "ISO".to_string())]
    );

    let mut harness = Harness::with(|settings| settings.replay_startup_options = true);
    let (_, mut client) = harness.connect();
    client
        .write_all(&startup(&[
            ("user", "svc"),
            ("database", "app"),
            ("DateStyle", "ISO"),
        ]))
        .unwrap();
    harness.spin();
    read_handshake(&mut client, 1);
    assert!(harness.backends.requests.lock()[0].startup_options.is_empty());

    let mut backend = harness.backend(0);
    client.write_all(&query("SELECT 1")).unwrap();
    harness.spin();
    assert_eq!(
        read_query(&mut backend),
        "set local \"DateStyle\"='ISO';SELECT 1"
    );
}

#[test]
fn test_startup_option_with_quote() {
    let mut harness = Harness::with(|settings| settings.replay_startup_options = true);
    let (_, mut client) = harness.connect();
    client
        .write_all(&startup(&[
            ("user", "svc"),
            ("database", "app"),
            ("application_name", "O'Reilly"),
        ]))
        .unwrap();
    harness.spin();
    read_handshake(&mut client, 1);

    let mut backend = harness.backend(0);
    client.write_all(&query("SELECT 1")).unwrap();
    harness.spin();
    assert_eq!(
        read_query(&mut backend),
        "set local \"application_name\"='O''Reilly';SELECT 1"
    );
}

#[test]
fn test_ssl_request_declined() {
    let mut harness = Harness::new();
    let (_, mut client) = harness.connect();

    let mut request = 8i32.to_be_bytes().to_vec();
    request.extend(80877103i32.to_be_bytes());
    client.write_all(&request).unwrap();
    harness.spin();

    let mut reply = [0u8; 1];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(reply[0], b'N');

    client
        .write_all(&startup(&[("user", "svc"), ("database", "app")]))
        .unwrap();
    harness.spin();
    read_handshake(&mut client, 1);
    assert_eq!(harness.stats().ssl_clients, 0);
}

#[test]
fn test_startup_without_user() {
    let mut harness = Harness::new();
    let (_, mut client) = harness.connect();
    client.write_all(&startup(&[("database", "app")])).unwrap();
    harness.spin();

    assert_eq!(read_error(&mut client).code, "28000");
    assert_closed(&mut client);
    assert_eq!(harness.stats().clients, 0);
    assert_eq!(harness.launched(), 0);
}

#[test]
fn test_unsupported_protocol_version() {
    let mut harness = Harness::new();
    let (_, mut client) = harness.connect();

    let mut packet = 8i32.to_be_bytes().to_vec();
    packet.extend((2i32 << 16).to_be_bytes());
    client.write_all(&packet).unwrap();
    harness.spin();

    assert_eq!(read_error(&mut client).code, "0A000");
    assert_closed(&mut client);
}

#[test]
fn test_cancel_request_closes_silently() {
    let mut harness = Harness::new();
    let (_, mut client) = harness.connect();

    let mut packet = 16i32.to_be_bytes().to_vec();
    packet.extend(80877102i32.to_be_bytes());
    packet.extend(1234i32.to_be_bytes());
    packet.extend(5i32.to_be_bytes());
    client.write_all(&packet).unwrap();
    harness.spin();

    assert_closed(&mut client);
    assert_eq!(harness.stats().clients, 0);
}

#[test]
fn test_oversized_startup_packet() {
    let mut harness = Harness::new();
    let (_, mut client) = harness.connect();
    client.write_all(&20_000i32.to_be_bytes()).unwrap();
    harness.spin();

    assert_closed(&mut client);
    assert_eq!(harness.stats().clients, 0);
}

#[test]
fn test_terminate_idle_client() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);

    client.write_all(&[b'X', 0, 0, 0, 4]).unwrap();
    harness.spin();
    assert_closed(&mut client);

    let pool = harness.pool("app", "svc");
    assert_eq!(pool.n_connected_clients, 0);
    assert_eq!(pool.n_idle_clients, 0);
    assert_eq!(pool.n_idle_backends(), 1);

    let stats = harness.stats();
    assert_eq!(stats.clients, 0);
    assert_eq!(stats.idle_clients, 0);
    assert_eq!(stats.backends, 1);
}

#[test]
fn test_terminate_in_transaction_dedicates_backend() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    client.write_all(&query("BEGIN")).unwrap();
    harness.spin();
    read_query(&mut backend);
    backend.write_all(&reply("BEGIN", true)).unwrap();
    harness.spin();
    read_message(&mut client);
    read_message(&mut client);

    client.write_all(&[b'X', 0, 0, 0, 4]).unwrap();
    harness.spin();
    assert_eq!(&read_message(&mut backend)[..], &[b'X', 0, 0, 0, 4]);
    assert_eq!(harness.stats().dedicated_backends, 1);
    assert_eq!(harness.pool("app", "svc").n_dedicated, 1);

    client.shutdown(Shutdown::Both).unwrap();
    harness.spin();

    let stats = harness.stats();
    assert_eq!(stats.clients, 0);
    assert_eq!(stats.backends, 0);
    assert_eq!(stats.dedicated_backends, 0);
    assert_eq!(harness.pool("app", "svc").n_launched, 0);
}

#[test]
fn test_client_gone_mid_transaction() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    client.write_all(&query("BEGIN")).unwrap();
    harness.spin();
    read_query(&mut backend);
    backend.write_all(&reply("BEGIN", true)).unwrap();
    harness.spin();

    client.shutdown(Shutdown::Both).unwrap();
    harness.spin();

    assert_eq!(&read_message(&mut backend)[..], &[b'X', 0, 0, 0, 4]);
    let stats = harness.stats();
    assert_eq!(stats.clients, 0);
    assert_eq!(stats.backends, 0);
    assert_eq!(stats.idle_backends, 0);
}

#[test]
fn test_backend_crash_with_pending_client() {
    let mut harness = Harness::with(|settings| settings.session_pool_size = 1);
    let mut holder = harness.login("svc", "app", 1);
    let backend = harness.backend(0);

    holder.write_all(&query("SELECT pg_sleep(10)")).unwrap();
    harness.spin();

    let (_, mut waiting) = harness.connect();
    waiting
        .write_all(&startup(&[("user", "svc"), ("database", "app")]))
        .unwrap();
    harness.spin();
    assert_eq!(harness.pool("app", "svc").n_pending(), 1);

    backend.shutdown(Shutdown::Both).unwrap();
    harness.spin();

    // The client using the backend is told, the waiting one gets a new backend.
    assert_eq!(read_error(&mut holder).code, "08006");
    assert_closed(&mut holder);
    read_handshake(&mut waiting, 2);

    assert_eq!(harness.launched(), 2);
    let pool = harness.pool("app", "svc");
    assert_eq!(pool.n_pending(), 0);
    assert_eq!(pool.n_launched, 1);
    assert_eq!(harness.stats().backends, 1);
}

#[test]
fn test_too_many_sessions() {
    let mut harness = Harness::with(|settings| settings.max_sessions = 1);
    let (_, _first) = harness.connect();
    let (_, _second) = harness.connect();

    let (id, mut third) = harness.try_connect();
    assert!(id.is_none());
    assert_eq!(read_error(&mut third).code, "53300");
    assert_closed(&mut third);
    assert_eq!(harness.stats().clients, 2);
}

#[test]
fn test_no_slot_for_backend() {
    let mut harness = Harness::with(|settings| settings.max_sessions = 1);
    let (_, _idle) = harness.connect();
    let (_, mut client) = harness.connect();

    client
        .write_all(&startup(&[("user", "svc"), ("database", "app")]))
        .unwrap();
    harness.spin();

    assert_eq!(read_error(&mut client).code, "53300");
    assert_closed(&mut client);
    assert_eq!(harness.launched(), 0);
    assert_eq!(harness.stats().backends, 0);
}

#[test]
fn test_too_many_waiting() {
    let mut harness = Harness::with(|settings| {
        settings.session_pool_size = 1;
        settings.max_pending_clients = 1;
    });
    let mut holder = harness.login("svc", "app", 1);
    holder.write_all(&query("SELECT pg_sleep(10)")).unwrap();
    harness.spin();

    let (_, mut waiting) = harness.connect();
    waiting
        .write_all(&startup(&[("user", "svc"), ("database", "app")]))
        .unwrap();
    harness.spin();
    let (_, mut rejected) = harness.connect();
    rejected
        .write_all(&startup(&[("user", "svc"), ("database", "app")]))
        .unwrap();
    harness.spin();

    assert_eq!(read_error(&mut rejected).code, "53300");
    assert_closed(&mut rejected);
    assert_eq!(harness.pool("app", "svc").n_pending(), 1);
}

#[test]
fn test_backend_launch_failure() {
    let mut harness = Harness::new();
    harness.backends.fail.store(true, Ordering::Relaxed);

    let (_, mut client) = harness.connect();
    client
        .write_all(&startup(&[("user", "svc"), ("database", "app")]))
        .unwrap();
    harness.spin();

    let error = read_error(&mut client);
    assert_eq!(error.code, "08006");
    assert!(error.detail.unwrap().contains("connection refused"));
    assert_closed(&mut client);
    assert_eq!(harness.stats().clients, 0);
    assert_eq!(harness.stats().idle_clients, 0);
}

#[test]
fn test_idle_backend_timeout() {
    let mut harness = Harness::with(|settings| {
        settings.idle_backend_timeout = Some(Duration::from_millis(20))
    });
    let _client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    std::thread::sleep(Duration::from_millis(50));
    harness.spin();

    assert_eq!(&read_message(&mut backend)[..], &[b'X', 0, 0, 0, 4]);
    assert_eq!(harness.stats().backends, 0);
    assert_eq!(harness.stats().idle_backends, 0);
    assert_eq!(harness.pool("app", "svc").n_idle_backends(), 0);
}

#[test]
fn test_hangout_twice() {
    let mut harness = Harness::new();
    let (id, mut client) = harness.connect();
    client
        .write_all(&startup(&[("user", "svc"), ("database", "app")]))
        .unwrap();
    harness.spin();
    read_handshake(&mut client, 1);

    harness.proxy.hangout(id, "test");
    harness.proxy.hangout(id, "test");
    assert_eq!(harness.proxy.hangout.len(), 1);
    assert_eq!(harness.stats().idle_clients, 0);

    harness.spin();
    assert!(harness.proxy.channel(id).is_none());
    assert_eq!(harness.stats().clients, 0);
    assert_eq!(harness.pool("app", "svc").n_connected_clients, 0);
}

#[test]
fn test_stale_token() {
    let mut harness = Harness::new();
    let (id, _client) = harness.connect();
    harness.proxy.hangout(id, "test");
    harness.spin();

    let (other, mut client) = harness.connect();
    assert_ne!(id, other);

    harness.proxy.dispatch(Event {
        token: id.token(),
        readable: true,
        writable: true,
        closed: true,
    });
    assert!(harness.proxy.channel(other).is_some());

    client
        .write_all(&startup(&[("user", "svc"), ("database", "app")]))
        .unwrap();
    harness.spin();
    read_handshake(&mut client, 1);
}

#[test]
fn test_shutdown() {
    let mut harness = Harness::new();
    let mut client = harness.login("svc", "app", 1);
    let mut backend = harness.backend(0);

    harness.proxy.shutdown_all();

    assert_eq!(read_error(&mut client).code, "57P01");
    assert_closed(&mut client);
    assert_eq!(&read_message(&mut backend)[..], &[b'X', 0, 0, 0, 4]);
    let stats = harness.stats();
    assert_eq!(stats.clients, 0);
    assert_eq!(stats.backends, 0);
    assert_eq!(stats.pools, 0);
    assert_eq!(stats.idle_backends, 0);
    assert_eq!(stats.idle_clients, 0);
}
