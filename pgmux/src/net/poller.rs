//! Readiness multiplexer.
//!
//! Thin wrapper around edge-triggered epoll. Every descriptor is
//! registered for both read and write readiness, so the engine only
//! learns about transitions and has to drain sockets until they
//! would block.

use std::io::{Error, ErrorKind, Result};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// User data attached to a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub u64);

/// Readiness reported for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Error or hang-up. Reads will surface the actual condition.
    pub closed: bool,
}

/// Batch of events returned by [`Poller::wait`].
pub struct Events {
    list: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<Event> {
        if index >= self.len {
            return None;
        }
        let event = self.list[index];
        let flags = event.events;
        Some(Event {
            token: Token(event.u64),
            readable: flags & (libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32) != 0,
            writable: flags & libc::EPOLLOUT as u32 != 0,
            closed: flags & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        (0..self.len).filter_map(|i| self.get(i))
    }
}

#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
}

impl Poller {
    /// Create the epoll instance. Failure here is the only
    /// thing that stops a worker from running.
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: Token) -> Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: token.0,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn channel_interest() -> u32 {
        (libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLRDHUP | libc::EPOLLET) as u32
    }

    /// Watch a channel socket for read and write readiness, edge-triggered.
    pub fn register(&self, fd: &impl AsRawFd, token: Token) -> Result<()> {
        self.ctl(
            libc::EPOLL_CTL_ADD,
            fd.as_raw_fd(),
            Self::channel_interest(),
            token,
        )
    }

    /// Watch a listening socket. Level-triggered, so a backlog left
    /// behind after hitting the session limit is reported again.
    pub fn register_listener(&self, fd: &impl AsRawFd, token: Token) -> Result<()> {
        self.ctl(
            libc::EPOLL_CTL_ADD,
            fd.as_raw_fd(),
            libc::EPOLLIN as u32,
            token,
        )
    }

    /// Replace the token and re-arm the interest set.
    pub fn reregister(&self, fd: &impl AsRawFd, token: Token) -> Result<()> {
        self.ctl(
            libc::EPOLL_CTL_MOD,
            fd.as_raw_fd(),
            Self::channel_interest(),
            token,
        )
    }

    /// Stop watching a descriptor. Must happen before it's closed.
    pub fn deregister(&self, fd: &impl AsRawFd) -> Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, fd.as_raw_fd(), 0, Token(0)) {
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            result => result,
        }
    }

    /// Wait for readiness. Interrupted waits return an empty batch.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        let timeout = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);
        let rc = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.list.as_mut_ptr(),
                events.list.len() as i32,
                timeout,
            )
        };

        if rc < 0 {
            let err = Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                events.len = 0;
                return Ok(0);
            }
            return Err(err);
        }

        events.len = rc as usize;
        Ok(events.len)
    }
}
