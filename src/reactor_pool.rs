// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// N reactors plus one dedicated acceptor thread. The acceptor owns its own
// multiplexer registering only the listening socket(s); accepted fds are
// tuned via `socket_config` and handed to a reactor chosen round-robin.

use std::net::TcpListener;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::multiplexer::Multiplexer;
use crate::reactor::{Reactor, ReactorHandler};
use crate::socket_config::{tune_accepted, SocketTuning};

/// Callback invoked on the acceptor thread for every accepted connection,
/// already assigned to a reactor. Returning `false` tells the pool to close
/// the socket immediately (the callback declined it).
pub trait AcceptHandler: Send + Sync {
    fn on_accept(&self, reactor: &Arc<Reactor>, stream: std::net::TcpStream, peer: std::net::SocketAddr) -> bool;
}

pub struct ReactorPool {
    reactors: Vec<Arc<Reactor>>,
    next: AtomicUsize,
    tuning: SocketTuning,
}

impl ReactorPool {
    pub fn new(reactor_count: usize, tuning: SocketTuning) -> std::io::Result<Self> {
        let mut reactors = Vec::with_capacity(reactor_count.max(1));
        for id in 0..reactor_count.max(1) {
            reactors.push(Arc::new(Reactor::new(id)?));
        }
        Ok(Self {
            reactors,
            next: AtomicUsize::new(0),
            tuning,
        })
    }

    /// Round-robin reactor selection. Kept under its legacy name as a doc
    /// alias for readers coming from the original `get_roubin_reactor` API.
    pub fn next_reactor(&self) -> &Arc<Reactor> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.reactors.len();
        &self.reactors[i]
    }

    /// Doc alias for [`ReactorPool::next_reactor`].
    #[doc(alias = "get_roubin_reactor")]
    pub fn get_roubin_reactor(&self) -> &Arc<Reactor> {
        self.next_reactor()
    }

    pub fn reactors(&self) -> &[Arc<Reactor>] {
        &self.reactors
    }

    /// Spawn one I/O thread per reactor, running `handler`.
    pub fn start_poll(&self, handler: Arc<dyn ReactorHandler>) -> Vec<JoinHandle<()>> {
        self.reactors
            .iter()
            .cloned()
            .map(|reactor| {
                let handler = handler.clone();
                std::thread::Builder::new()
                    .name(format!("reactor-{}", reactor.id))
                    .spawn(move || reactor.run(handler))
                    .expect("spawn reactor thread")
            })
            .collect()
    }

    pub fn request_stop_all(&self) {
        for r in &self.reactors {
            r.request_stop();
        }
    }

    /// Run the acceptor loop on the calling thread. Blocks until
    /// `should_stop` returns true.
    pub fn run_acceptor<S>(
        &self,
        listener: TcpListener,
        handler: Arc<dyn AcceptHandler>,
        should_stop: S,
    ) -> std::io::Result<()>
    where
        S: Fn() -> bool,
    {
        listener.set_nonblocking(true)?;
        let mut mux = Multiplexer::new(16)?;
        let listen_fd = listener.as_raw_fd();
        mux.add_read(listen_fd)?;

        let mut ready = Vec::new();
        while !should_stop() {
            ready.clear();
            mux.wait(Duration::from_millis(200), &mut ready)?;
            if ready.is_empty() {
                continue;
            }
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        tune_accepted(&stream, &self.tuning);
                        let reactor = self.next_reactor();
                        if !handler.on_accept(reactor, stream, peer) {
                            tracing::debug!(%peer, "accept callback declined connection");
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
            mux.add_read(listen_fd).or_else(|_| mux.del(listen_fd).and_then(|_| mux.add_read(listen_fd)))?;
        }
        Ok(())
    }
}
