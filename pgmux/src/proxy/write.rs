//! Writing to channels.

use std::io::{ErrorKind, Write};
use std::time::Instant;

use tracing::{debug, trace};

use super::{ChannelId, Proxy};
use crate::net::messages::Terminate;
use crate::net::would_block;

impl Proxy {
    /// Send whatever the peer of `dst` staged for it.
    ///
    /// Once the peer's buffer is drained, reading from the peer resumes
    /// unless `sync` is set, in which case the caller is already reading
    /// from it. Returns false if no further progress is possible until
    /// the next readiness event.
    pub(super) fn channel_write(&mut self, dst: ChannelId, sync: bool) -> bool {
        let Some(channel) = self.channels.get(dst) else {
            return false;
        };

        if channel.disconnected {
            return false;
        }

        if channel.is_backend() && channel.interrupted {
            return self.terminate(dst);
        }

        let Some(src) = channel.peer else {
            return false;
        };

        let mut flushed = false;

        loop {
            let Some((dst_channel, src_channel)) = self.channels.get2_mut(dst, src) else {
                return false;
            };

            if src_channel.buffer.pending() == 0 {
                break;
            }
            flushed = true;

            match dst_channel.socket.write(src_channel.buffer.unsent()) {
                Ok(0) => {
                    debug!("{} closed while writing", dst_channel);
                    self.hangout(dst, "write");
                    return false;
                }

                Ok(n) => {
                    src_channel.buffer.sent(n);
                    trace!("{} bytes => {}", n, dst_channel);
                    if dst_channel.is_client() {
                        self.stats.tx_bytes.add(n as u64);
                    } else {
                        self.stats.rx_bytes.add(n as u64);
                    }
                }

                Err(err) if err.kind() == ErrorKind::Interrupted => continue,

                Err(err) if would_block(&err) => return false,

                Err(err) => {
                    debug!("write to {} failed: {}", dst_channel, err);
                    self.hangout(dst, "write");
                    return false;
                }
            }
        }

        if flushed {
            let Some((dst_channel, src_channel)) = self.channels.get2_mut(dst, src) else {
                return false;
            };

            let now = Instant::now();
            dst_channel.ready_for_query = false;
            dst_channel.last_activity = now;
            src_channel.buffer.compact();
            src_channel.last_activity = now;

            // The client got everything up to ReadyForQuery.
            if src_channel.is_backend() && src_channel.ready_for_query {
                self.ready.push_back(src);
                return true;
            }
        }

        sync || self.channel_read(src)
    }

    /// Send Terminate to a backend and drop it.
    fn terminate(&mut self, id: ChannelId) -> bool {
        let Some(channel) = self.channels.get_mut(id) else {
            return false;
        };

        match channel.socket.write(&Terminate::BYTES) {
            Err(err) if would_block(&err) => return false,
            Err(err) => debug!("couldn't terminate {}: {}", channel, err),
            Ok(_) => debug!("terminated {}", channel),
        }

        self.hangout(id, "terminate");
        true
    }
}
