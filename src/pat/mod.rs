// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// PAT: peer-addressed-tunnel messaging. Up to 255 numbered peers exchange
// length-framed datagrams over persistent TCP connections, independent of
// the SOCKS proxy's reactor pool. A server-role peer listens and
// authenticates inbound connections; a client-role peer dials out and
// reconnects with backoff. A single ticker thread drives every peer's
// user-timer wheel.

pub mod frame;
pub mod peer;

pub use peer::{Peer, PeerCallback, PeerEvent, PeerType, DEL_TIMER_TAG};

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;

/// Owns every numbered peer plus the shared ticker and listener threads.
pub struct PatManager {
    peers: Mutex<HashMap<u8, Arc<Peer>>>,
    username: String,
    password: String,
    shutting_down: Arc<AtomicBool>,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl PatManager {
    pub fn new(username: &str, password: &str) -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
            username: username.to_string(),
            password: password.to_string(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        })
    }

    fn peer_or_create(&self, pno: u8) -> Arc<Peer> {
        self.peers
            .lock()
            .unwrap()
            .entry(pno)
            .or_insert_with(|| Arc::new(Peer::new(pno, &self.username, &self.password)))
            .clone()
    }

    /// Register a client-role peer: dials `host:port`, authenticates, and
    /// reconnects on failure with exponential backoff.
    pub fn add_client_peer(self: &Arc<Self>, pno: u8, host: String, port: u16, cb: PeerCallback) -> Arc<Peer> {
        let peer = self.peer_or_create(pno);
        peer.init_client(host, port);
        peer.set_callback(cb);
        self.spawn_peer_threads(&peer);
        peer
    }

    /// Register a server-role peer that only receives inbound connections
    /// accepted by [`PatManager::run_listener`].
    pub fn add_server_peer(self: &Arc<Self>, pno: u8, cb: PeerCallback) -> Arc<Peer> {
        let peer = self.peer_or_create(pno);
        peer.set_callback(cb);
        self.spawn_worker_only(&peer);
        peer
    }

    fn spawn_peer_threads(self: &Arc<Self>, peer: &Arc<Peer>) {
        let worker_peer = Arc::clone(peer);
        let sender_peer = Arc::clone(peer);
        let mut threads = self.threads.lock().unwrap();
        threads.push(
            std::thread::Builder::new()
                .name(format!("pat-worker-{}", peer.pno))
                .spawn(move || worker_peer.run_worker())
                .expect("spawn pat worker thread"),
        );
        threads.push(
            std::thread::Builder::new()
                .name(format!("pat-sender-{}", peer.pno))
                .spawn(move || sender_peer.run_sender())
                .expect("spawn pat sender thread"),
        );
    }

    fn spawn_worker_only(self: &Arc<Self>, peer: &Arc<Peer>) {
        let worker_peer = Arc::clone(peer);
        self.threads.lock().unwrap().push(
            std::thread::Builder::new()
                .name(format!("pat-worker-{}", peer.pno))
                .spawn(move || worker_peer.run_worker())
                .expect("spawn pat worker thread"),
        );
    }

    /// Start the shared 100ms ticker thread advancing every peer's timer
    /// wheel. Returns the join handle so the caller can bound shutdown.
    pub fn start_ticker(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let manager = Arc::clone(self);
        std::thread::Builder::new()
            .name("pat-ticker".into())
            .spawn(move || {
                while !manager.shutting_down.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(100));
                    for peer in manager.peers.lock().unwrap().values() {
                        peer.tick();
                    }
                }
            })
            .expect("spawn pat ticker thread")
    }

    /// Accept loop for server-role peers: reads one auth frame per
    /// connection, verifies `client_pno`/credentials, replies, then hands
    /// the stream's data frames to the matching peer's receive queue.
    pub fn run_listener(self: &Arc<Self>, listener: &TcpListener) -> std::io::Result<()> {
        listener.set_nonblocking(false)?;
        while !self.shutting_down.load(Ordering::Acquire) {
            let (stream, _addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let manager = Arc::clone(self);
            std::thread::Builder::new()
                .name("pat-inbound".into())
                .spawn(move || {
                    if let Err(e) = manager.serve_inbound(stream) {
                        tracing::warn!(error = %e, "pat: inbound connection failed");
                    }
                })
                .expect("spawn pat inbound thread");
        }
        Ok(())
    }

    fn serve_inbound(self: &Arc<Self>, mut stream: TcpStream) -> Result<(), TransportError> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).map_err(TransportError::Io)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).map_err(TransportError::Io)?;
        let auth = frame::decode_auth_request(&body).map_err(|_| TransportError::Closed)?;

        let ok = auth.user == self.username && auth.pass == self.password;
        stream.write_all(&frame::encode_auth_response(ok)).map_err(TransportError::Io)?;
        if !ok {
            return Err(TransportError::Closed);
        }

        loop {
            let mut len_buf = [0u8; 4];
            if stream.read_exact(&mut len_buf).is_err() {
                return Ok(());
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            if stream.read_exact(&mut body).is_err() {
                return Ok(());
            }
            if let Ok(data) = frame::decode_data(&body) {
                let dest = self.peer_or_create(data.dest_pno);
                dest.append_to_recv(data.src_pno, 0, data.payload);
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        for peer in self.peers.lock().unwrap().values() {
            peer.shutdown();
        }
        if let Ok(mut threads) = self.threads.lock() {
            for t in threads.drain(..) {
                let _ = t.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn client_server_roundtrip_delivers_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_mgr = PatManager::new("u", "p");
        let received = Arc::new(AtomicUsize::new(0));
        let received_cb = Arc::clone(&received);
        server_mgr.add_server_peer(9, Arc::new(move |_src, _tag, data: &[u8]| {
            if data == b"ping" {
                received_cb.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }));
        let server_mgr_for_listener = Arc::clone(&server_mgr);
        std::thread::spawn(move || {
            let _ = server_mgr_for_listener.run_listener(&listener);
        });

        let client_mgr = PatManager::new("u", "p");
        let client_peer = client_mgr.add_client_peer(1, addr.ip().to_string(), addr.port(), Arc::new(|_, _, _| {}));

        std::thread::sleep(Duration::from_millis(300));
        client_peer.send(9, b"ping");
        std::thread::sleep(Duration::from_millis(300));

        assert_eq!(received.load(std::sync::atomic::Ordering::SeqCst), 1);

        client_mgr.shutdown();
        server_mgr.shutdown();
    }
}
