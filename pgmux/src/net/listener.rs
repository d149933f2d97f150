//! Listening sockets.

use std::io::{ErrorKind, Result};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use socket2::{Domain, Protocol, Socket as RawSocket, Type};
use tracing::info;

use super::Socket;

#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind a TCP listener. With `reuse_port`, several workers bind the
    /// same address and the kernel spreads connections between them.
    pub fn tcp(host: &str, port: u16, reuse_port: bool) -> Result<Self> {
        let addr: SocketAddr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(ErrorKind::InvalidInput, format!("no address for {}", host))
        })?;

        let socket = RawSocket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        if reuse_port {
            socket.set_reuse_port(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;

        info!("listening on {}", addr);

        Ok(Self::Tcp(socket.into()))
    }

    /// Bind a UNIX domain socket, replacing a stale socket file.
    pub fn unix(path: &Path) -> Result<Self> {
        match std::fs::remove_file(path) {
            Err(err) if err.kind() != ErrorKind::NotFound => return Err(err),
            _ => (),
        }

        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;

        info!("listening on {}", path.display());

        Ok(Self::Unix {
            listener,
            path: path.to_owned(),
        })
    }

    /// Accept one connection. `Ok(None)` once the backlog is drained.
    pub fn accept(&self) -> Result<Option<Socket>> {
        let result = match self {
            Self::Tcp(listener) => listener.accept().map(|(stream, _)| Socket::Tcp(stream)),
            Self::Unix { listener, .. } => {
                listener.accept().map(|(stream, _)| Socket::Unix(stream))
            }
        };

        match result {
            Ok(socket) => Ok(Some(socket)),
            Err(err) if super::would_block(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Unix { .. } => None,
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(listener) => listener.as_raw_fd(),
            Self::Unix { listener, .. } => listener.as_raw_fd(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}
