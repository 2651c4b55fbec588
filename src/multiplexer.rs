// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Thin `mio::Poll` wrapper giving the reactor one cross-platform multiplexer
// surface instead of hand-rolled per-OS epoll/kqueue/IOCP backends. Every
// reactor owns two of these: one tracked by the time wheel for arming
// timeouts, one plain.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

/// A readiness event delivered by [`Multiplexer::wait`].
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Wraps `mio::Poll`; fds are registered one-shot — after a `wait()` reports
/// readiness for an fd, the caller must call `mod_*` again before the next
/// event for that fd will be delivered.
pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    pub fn new(capacity_hint: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity_hint.max(64)),
        })
    }

    fn token(fd: RawFd) -> Token {
        Token(fd as usize)
    }

    pub fn add_read(&self, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Self::token(fd), Interest::READABLE)
    }

    pub fn add_write(&self, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Self::token(fd), Interest::WRITABLE)
    }

    pub fn add_read_write(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().register(
            &mut SourceFd(&fd),
            Self::token(fd),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    /// Re-arm a previously registered fd for read interest (one-shot).
    pub fn mod_read_oneshot(&self, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), Self::token(fd), Interest::READABLE)
    }

    /// Re-arm a previously registered fd for write interest (one-shot).
    pub fn mod_write_oneshot(&self, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), Self::token(fd), Interest::WRITABLE)
    }

    pub fn del(&self, fd: RawFd) -> io::Result<()> {
        match self.poll.registry().deregister(&mut SourceFd(&fd)) {
            Ok(()) => Ok(()),
            // Already gone (e.g. peer closed and the kernel dropped the fd
            // from its interest set) — not an error for our purposes.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Block up to `timeout` for ready fds, appending them to `out`.
    pub fn wait(&mut self, timeout: Duration, out: &mut Vec<ReadyEvent>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        for ev in self.events.iter() {
            out.push(ReadyEvent {
                fd: ev.token().0 as RawFd,
                readable: ev.is_readable(),
                writable: ev.is_writable(),
                error: ev.is_error() || ev.is_read_closed() || ev.is_write_closed(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;

    #[test]
    fn reports_readable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut mux = Multiplexer::new(8).unwrap();
        mux.add_read(listener.as_raw_fd()).unwrap();

        let _client = TcpStream::connect(addr).unwrap();

        let mut out = Vec::new();
        mux.wait(Duration::from_millis(500), &mut out).unwrap();
        assert!(out.iter().any(|e| e.fd == listener.as_raw_fd() && e.readable));
    }
}
