use std::io::Result;

use pgmux_config::Tcp;
use socket2::{SockRef, TcpKeepalive};
use tracing::trace;

use super::Socket;

/// Apply TCP settings to a client or backend socket.
/// UNIX and upgraded sockets are left as they are.
pub fn tweak(socket: &Socket, config: &Tcp) -> Result<()> {
    let Socket::Tcp(stream) = socket else {
        return Ok(());
    };
    trace!("TCP settings: {}", config);

    // Messages are small and latency matters more than packet count.
    stream.set_nodelay(true)?;

    let sock_ref = SockRef::from(stream);
    sock_ref.set_keepalive(config.keepalive())?;

    if config.keepalive() {
        let mut params = TcpKeepalive::new();
        if let Some(time) = config.time() {
            params = params.with_time(time);
        }
        if let Some(interval) = config.interval() {
            params = params.with_interval(interval);
        }
        if let Some(retries) = config.retries() {
            params = params.with_retries(retries);
        }
        sock_ref.set_tcp_keepalive(&params)?;
    }

    #[cfg(target_os = "linux")]
    if let Some(user_timeout) = config.user_timeout() {
        sock_ref.set_tcp_user_timeout(Some(user_timeout))?;
    }

    Ok(())
}
