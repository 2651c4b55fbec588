// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One PAT peer: a numbered endpoint with a worker thread draining its
// receive queue in FIFO order (DEL_TIMER pseudo-events head-inserted), a
// sender thread draining its send queue and owning the reconnect loop, and
// a per-peer time wheel for user timers. Unlike the proxy connections,
// peers are long-lived thread-per-peer objects rather than reactor-driven
// state machines — this mirrors the spec's emphasis on dedicated
// worker/sender threads for PAT rather than multiplexed I/O.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;
use crate::os_event::OsEvent;
use crate::pat::frame;
use crate::time_wheel::TimeWheel;

/// Reserved event tag marking a DEL_TIMER pseudo-event; these are
/// head-inserted into the receive queue ahead of ordinary FIFO events.
pub const DEL_TIMER_TAG: u32 = u32::MAX;

pub type PeerCallback = Arc<dyn Fn(u8, u32, &[u8]) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub sender_pno: u8,
    pub event_tag: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerType {
    Uninit,
    Client,
    Server,
}

#[derive(Debug, Clone)]
pub enum PeerRole {
    Client { host: String, port: u16 },
    Server { bind_host: String, bind_port: u16 },
}

struct Queues {
    recv: VecDeque<PeerEvent>,
    send: VecDeque<Vec<u8>>,
}

/// A single numbered PAT peer (`pno ∈ [0, 254]`).
pub struct Peer {
    pub pno: u8,
    pub peer_type: PeerType,
    role: Mutex<Option<PeerRole>>,
    queues: Mutex<Queues>,
    recv_event: OsEvent,
    send_event: OsEvent,
    wheel: TimeWheel<u64>,
    callback: Mutex<Option<PeerCallback>>,
    stream: Mutex<Option<TcpStream>>,
    username: String,
    password: String,
    shutting_down: AtomicBool,
    reconnect_attempts: AtomicU32,
}

impl Peer {
    pub fn new(pno: u8, username: &str, password: &str) -> Self {
        Self {
            pno,
            peer_type: PeerType::Uninit,
            role: Mutex::new(None),
            queues: Mutex::new(Queues { recv: VecDeque::new(), send: VecDeque::new() }),
            recv_event: OsEvent::new(),
            send_event: OsEvent::new(),
            wheel: TimeWheel::new(64),
            callback: Mutex::new(None),
            stream: Mutex::new(None),
            username: username.to_string(),
            password: password.to_string(),
            shutting_down: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    pub fn set_callback(&self, cb: PeerCallback) {
        *self.callback.lock().unwrap() = Some(cb);
    }

    pub fn init_client(&self, host: String, port: u16) {
        *self.role.lock().unwrap() = Some(PeerRole::Client { host, port });
    }

    pub fn init_server(&self, bind_host: String, bind_port: u16) {
        *self.role.lock().unwrap() = Some(PeerRole::Server { bind_host, bind_port });
    }

    /// Append an event to the caller's receive queue in FIFO order, or
    /// head-first when `event_tag == DEL_TIMER_TAG`. Wakes the worker.
    pub fn append_to_recv(&self, sender_pno: u8, event_tag: u32, data: Vec<u8>) {
        let ev = PeerEvent { sender_pno, event_tag, data };
        let mut q = self.queues.lock().unwrap();
        if event_tag == DEL_TIMER_TAG {
            q.recv.push_front(ev);
        } else {
            q.recv.push_back(ev);
        }
        drop(q);
        self.recv_event.notify();
    }

    fn enqueue_send(&self, frame: Vec<u8>) {
        self.queues.lock().unwrap().send.push_back(frame);
        self.send_event.notify();
    }

    /// Schedule a user timer. On expiry, enqueues `(event_tag, arg)` as a
    /// receive-queue event from this same peer.
    pub fn set_timer(&self, event_tag: u32, delay_ticks: u32, arg: u64) -> Option<crate::time_wheel::TimerId> {
        self.wheel.set_timer(delay_ticks, event_tag, arg).ok()
    }

    pub fn del_timer(&self, id: crate::time_wheel::TimerId) {
        self.wheel.del_timer(id);
        self.append_to_recv(self.pno, DEL_TIMER_TAG, Vec::new());
    }

    /// Advance this peer's timer wheel by one 100ms tick, delivering any
    /// fired timers to the receive queue. Called by the PAT manager's
    /// shared ticker thread.
    pub fn tick(&self) {
        for fired in self.wheel.tick() {
            self.append_to_recv(self.pno, fired.event_tag, fired.user_arg.to_be_bytes().to_vec());
        }
    }

    pub fn send(&self, dest_pno: u8, payload: &[u8]) {
        self.enqueue_send(frame::encode_data(dest_pno, self.pno, payload));
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.recv_event.quit_waiting();
        self.send_event.quit_waiting();
    }

    /// Worker thread body: drains the receive queue and invokes the
    /// registered callback for each event, FIFO (DEL_TIMER excepted).
    pub fn run_worker(self: &Arc<Self>) {
        loop {
            let woke = self.recv_event.wait_if(
                || self.queues.lock().unwrap().recv.is_empty() && !self.shutting_down.load(Ordering::Acquire),
                Some(Duration::from_millis(200)),
            );
            if self.shutting_down.load(Ordering::Acquire) {
                return;
            }
            if !woke {
                continue;
            }
            while let Some(ev) = self.queues.lock().unwrap().recv.pop_front() {
                if let Some(cb) = self.callback.lock().unwrap().as_ref() {
                    cb(ev.sender_pno, ev.event_tag, &ev.data);
                }
            }
        }
    }

    /// Sender thread body: establishes (or re-establishes) the outbound
    /// connection for a client-role peer, authenticates, then drains the
    /// send queue.
    pub fn run_sender(self: &Arc<Self>) {
        let role = self.role.lock().unwrap().clone();
        let Some(PeerRole::Client { host, port }) = role else {
            return;
        };
        while !self.shutting_down.load(Ordering::Acquire) {
            match self.connect_and_auth(&host, port) {
                Ok(stream) => {
                    self.reconnect_attempts.store(0, Ordering::Release);
                    *self.stream.lock().unwrap() = Some(stream);
                    self.drain_send_queue();
                    *self.stream.lock().unwrap() = None;
                }
                Err(e) => {
                    tracing::warn!(pno = self.pno, error = %e, "pat: connect/auth failed, backing off");
                }
            }
            if self.shutting_down.load(Ordering::Acquire) {
                return;
            }
            self.backoff_sleep();
        }
    }

    /// Synchronous connect with a fixed 3s timeout, per the reconnect policy
    /// (only the back-off schedule itself was left open for tuning).
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

    fn connect_and_auth(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(TransportError::Io)?
            .next()
            .ok_or(TransportError::Closed)?;
        let stream = TcpStream::connect_timeout(&addr, Self::CONNECT_TIMEOUT).map_err(TransportError::Io)?;
        stream.set_nodelay(true).ok();
        let mut s = stream.try_clone().map_err(TransportError::Io)?;
        let auth = frame::encode_auth_request(self.pno, &self.username, &self.password);
        s.write_all(&auth).map_err(TransportError::Io)?;
        let mut status = [0u8; 1];
        s.read_exact(&mut status).map_err(TransportError::Io)?;
        if status[0] != frame::AUTH_OK {
            return Err(TransportError::Closed);
        }
        Ok(stream)
    }

    fn drain_send_queue(&self) {
        loop {
            let woke = self.send_event.wait_if(
                || self.queues.lock().unwrap().send.is_empty() && !self.shutting_down.load(Ordering::Acquire),
                Some(Duration::from_millis(200)),
            );
            if self.shutting_down.load(Ordering::Acquire) {
                return;
            }
            if !woke {
                continue;
            }
            while let Some(frame) = {
                let next = self.queues.lock().unwrap().send.pop_front();
                next
            } {
                let mut guard = self.stream.lock().unwrap();
                let Some(stream) = guard.as_mut() else { return };
                if stream.write_all(&frame).is_err() {
                    return;
                }
            }
        }
    }

    /// Exponential backoff starting at 1s, doubling per attempt, capped at
    /// 30s, with +/-20% jitter.
    fn backoff_sleep(&self) {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::AcqRel);
        let base_secs = (1u64 << attempt.min(5)).min(30);
        let jitter_frac = pseudo_jitter(self.pno, attempt);
        let millis = (base_secs as f64 * 1000.0 * (1.0 + jitter_frac)) as u64;
        std::thread::sleep(Duration::from_millis(millis));
    }
}

/// Deterministic pseudo-jitter in `[-0.2, 0.2]`, seeded from peer number and
/// attempt count. Avoids pulling in a `rand` dependency for a single jittered
/// sleep and keeps backoff timing reproducible in tests.
fn pseudo_jitter(pno: u8, attempt: u32) -> f64 {
    let mut x = (pno as u32).wrapping_mul(2654435761).wrapping_add(attempt.wrapping_mul(40503));
    x ^= x >> 13;
    x = x.wrapping_mul(0x5bd1e995);
    x ^= x >> 15;
    let unit = (x % 1000) as f64 / 1000.0;
    (unit - 0.5) * 0.4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn del_timer_is_head_inserted() {
        let peer = Arc::new(Peer::new(1, "u", "p"));
        peer.append_to_recv(2, 10, vec![1]);
        peer.append_to_recv(2, 11, vec![2]);
        peer.append_to_recv(2, DEL_TIMER_TAG, vec![]);
        let q = peer.queues.lock().unwrap();
        assert_eq!(q.recv[0].event_tag, DEL_TIMER_TAG);
        assert_eq!(q.recv[1].event_tag, 10);
        assert_eq!(q.recv[2].event_tag, 11);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for pno in 0..10u8 {
            for attempt in 0..8u32 {
                let j = pseudo_jitter(pno, attempt);
                assert!((-0.2..=0.2).contains(&j));
            }
        }
    }

    #[test]
    fn timer_tick_enqueues_event() {
        let peer = Arc::new(Peer::new(1, "u", "p"));
        peer.set_timer(42, 1, 0xABCD);
        peer.tick();
        let q = peer.queues.lock().unwrap();
        assert_eq!(q.recv.len(), 1);
        assert_eq!(q.recv[0].event_tag, 42);
    }
}
