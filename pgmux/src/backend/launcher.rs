//! Opening backend connections.
//!
//! A backend is a regular Postgres connection. It's opened and
//! authenticated synchronously, then handed to the proxy together with
//! everything the server said after authentication. That handshake is
//! replayed to every client the backend gets assigned to first.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use pgmux_config::{Upstream, Users};
use tracing::{debug, info, warn};

use super::{options::backend_options, Error};
use crate::net::messages::{
    Authentication, BackendKeyData, ErrorResponse, FromBytes, Password, StartupPacket, ToBytes,
};
use crate::net::Socket;

/// What a pool needs from a new backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchRequest {
    pub database: String,
    /// Empty in multi-tenant mode.
    pub user: String,
    pub cmdline_options: Option<String>,
    pub startup_options: Vec<(String, String)>,
}

impl LaunchRequest {
    /// Value of the `options` startup parameter.
    pub fn options(&self) -> String {
        backend_options(self.cmdline_options.as_deref(), &self.startup_options)
    }
}

/// Authenticated backend connection.
#[derive(Debug)]
pub struct Launched {
    pub socket: Socket,
    /// Messages from AuthenticationOk up to and including ReadyForQuery.
    pub handshake: Bytes,
}

/// Starts backends for the proxy.
pub trait Launcher {
    fn launch(&mut self, request: &LaunchRequest) -> Result<Launched, Error>;
}

/// Connects to the upstream server over TCP or a UNIX socket.
#[derive(Debug, Clone)]
pub struct TcpLauncher {
    upstream: Upstream,
    users: Users,
}

impl TcpLauncher {
    pub fn new(upstream: &Upstream, users: &Users) -> Self {
        Self {
            upstream: upstream.clone(),
            users: users.clone(),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.upstream.connect_timeout()).filter(|timeout| !timeout.is_zero())
    }

    fn connect(&self) -> Result<Socket, Error> {
        let timeout = self.timeout();

        let socket = if self.upstream.is_unix() {
            let path = format!(
                "{}/.s.PGSQL.{}",
                self.upstream.host.trim_end_matches('/'),
                self.upstream.port
            );
            let stream = UnixStream::connect(path)?;
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
            Socket::Unix(stream)
        } else {
            let addr = (self.upstream.host.as_str(), self.upstream.port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| Error::NoAddress(self.upstream.host.clone()))?;
            let stream = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
                None => TcpStream::connect(addr)?,
            };
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
            Socket::Tcp(stream)
        };

        Ok(socket)
    }

    fn password(&self, database: &str, user: &str) -> Result<String, Error> {
        self.users
            .find(database, user)
            .map(|u| u.password().to_string())
            .filter(|password| !password.is_empty())
            .ok_or_else(|| Error::NoPassword(user.to_string()))
    }
}

impl Launcher for TcpLauncher {
    fn launch(&mut self, request: &LaunchRequest) -> Result<Launched, Error> {
        let started = Instant::now();
        let user = if request.user.is_empty() {
            self.upstream.user.clone().ok_or(Error::NoUser)?
        } else {
            request.user.clone()
        };
        let database = request.database.as_str();

        debug!("=> {}@{}:{}/{}", user, self.upstream.host, self.upstream.port, database);

        let mut socket = self.connect()?;

        let startup = StartupPacket::new()
            .param("user", &user)
            .param("database", database)
            .param("application_name", &self.upstream.application_name)
            .param("options", &request.options());
        socket.write_all(&startup.to_bytes()?)?;

        let mut handshake = BytesMut::new();

        // Authentication.
        loop {
            let message = read_message(&mut socket)?;

            match message[0] {
                b'E' => {
                    let error = ErrorResponse::from_bytes(message)?;
                    return Err(Error::ConnectionError(Box::new(error)));
                }
                b'R' => match Authentication::from_bytes(message.clone())? {
                    Authentication::Ok => {
                        handshake.extend_from_slice(&message);
                        break;
                    }
                    Authentication::ClearTextPassword => {
                        let password = self.password(database, &user)?;
                        socket.write_all(&Password::cleartext(&password).to_bytes()?)?;
                    }
                    Authentication::Md5(salt) => {
                        let password = self.password(database, &user)?;
                        socket.write_all(&Password::md5(&user, &password, &salt).to_bytes()?)?;
                    }
                    Authentication::Sasl(mechanism) => {
                        return Err(Error::UnsupportedAuthentication(format!(
                            "SASL ({})",
                            mechanism
                        )));
                    }
                    Authentication::Other(code) => {
                        return Err(crate::net::Error::UnsupportedAuthentication(code).into());
                    }
                },
                code => return Err(Error::UnexpectedMessage(code as char)),
            }
        }

        let mut key = None;

        loop {
            let message = read_message(&mut socket)?;
            handshake.extend_from_slice(&message);

            match message[0] {
                // ReadyForQuery (B)
                b'Z' => break,
                // BackendKeyData (B)
                b'K' => key = Some(BackendKeyData::from_bytes(message)?),
                // ParameterStatus (B)
                b'S' => (),
                // NoticeResponse (B)
                b'N' => warn!("notice while starting backend for {}/{}", user, database),
                // ErrorResponse (B)
                b'E' => {
                    let error = ErrorResponse::from_bytes(message)?;
                    return Err(Error::ConnectionError(Box::new(error)));
                }
                code => return Err(Error::UnexpectedMessage(code as char)),
            }
        }

        let key = key.ok_or(Error::NoBackendKeyData)?;

        info!(
            "new backend connection [{}@{}, pid: {}, {:.3}ms]",
            user,
            database,
            key.pid,
            started.elapsed().as_secs_f64() * 1000.0,
        );

        Ok(Launched {
            socket,
            handshake: handshake.freeze(),
        })
    }
}

/// Read one tagged message, blocking.
fn read_message(socket: &mut Socket) -> Result<Bytes, Error> {
    let mut header = [0u8; 5];
    socket.read_exact(&mut header)?;

    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len < 4 {
        return Err(crate::net::Error::InvalidLength(len as i64).into());
    }

    let mut message = BytesMut::zeroed(len as usize + 1);
    message[..5].copy_from_slice(&header);
    socket.read_exact(&mut message[5..])?;

    Ok(message.freeze())
}

/// Process ID in a captured handshake.
pub fn backend_pid(handshake: &[u8]) -> Option<i32> {
    BackendKeyData::find(handshake).map(|key| key.pid)
}
