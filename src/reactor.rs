// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One I/O thread per reactor, owning two multiplexers and an embedded time
// wheel for per-fd timeouts. Mirrors the spinlock-guarded-map pattern used
// for shared state elsewhere in this crate (compare `slot_pool::SlotPool`):
// a bare `SpinLock` field sits next to the data it protects rather than a
// generic lock wrapper.

use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::multiplexer::Multiplexer;
use crate::spin_lock::SpinLock;
use crate::time_wheel::TimeWheel;

/// Which side of a proxy connection an fd belongs to. Handlers dispatch on
/// this rather than raw fd numbers, since the plain multiplexer drains
/// without per-event fd context for payload lookups that need it twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Opaque per-fd payload carried by `ReactorData`. A tagged enum in place of
/// the original `void*` callback argument.
#[derive(Debug, Clone, Copy)]
pub enum ReactorPayload {
    Listener,
    Proxy { conn_id: u32, side: Side },
    PatPeer { pno: u8, side: Side },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorEvent {
    Readable,
    Writable,
    Timeout,
    Error,
}

struct ReactorData {
    payload: ReactorPayload,
    timer_id: Option<crate::time_wheel::TimerId>,
}

/// Callback invoked by the reactor run loop for every delivered event.
pub trait ReactorHandler: Send + Sync {
    fn on_event(&self, reactor: &Reactor, fd: RawFd, payload: ReactorPayload, event: ReactorEvent);
}

pub struct Reactor {
    pub id: usize,
    lock: SpinLock,
    map: std::cell::UnsafeCell<BTreeMap<RawFd, ReactorData>>,
    timeout_mux: Multiplexer,
    plain_mux: Multiplexer,
    wheel: TimeWheel<RawFd>,
    is_end: AtomicBool,
}

unsafe impl Send for Reactor {}
unsafe impl Sync for Reactor {}

const TICK: Duration = Duration::from_millis(100);
const WAIT_SLICE: Duration = Duration::from_millis(1);

impl Reactor {
    pub fn new(id: usize) -> std::io::Result<Self> {
        Ok(Self {
            id,
            lock: SpinLock::new(),
            map: std::cell::UnsafeCell::new(BTreeMap::new()),
            timeout_mux: Multiplexer::new(1024)?,
            plain_mux: Multiplexer::new(1024)?,
            wheel: TimeWheel::new(1024),
            is_end: AtomicBool::new(false),
        })
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn map_unchecked(&self) -> &mut BTreeMap<RawFd, ReactorData> {
        &mut *self.map.get()
    }

    /// Arm `fd` for a one-shot read, tracked by the time wheel with a
    /// `timeout_ticks`-tick deadline (0 = no timeout, delivered only via the
    /// plain multiplexer semantics — callers still use this mux for
    /// consistency of one-shot rearm behavior).
    pub fn add_timed_read(&self, fd: RawFd, payload: ReactorPayload, timeout_ticks: u32) -> std::io::Result<()> {
        self.timeout_mux.add_read(fd)?;
        self.arm_timeout(fd, payload, timeout_ticks);
        Ok(())
    }

    pub fn mod_timed_read(&self, fd: RawFd, payload: ReactorPayload, timeout_ticks: u32) -> std::io::Result<()> {
        self.clear_timeout(fd);
        self.timeout_mux.mod_read_oneshot(fd)?;
        self.arm_timeout(fd, payload, timeout_ticks);
        Ok(())
    }

    pub fn add_timed_write(&self, fd: RawFd, payload: ReactorPayload, timeout_ticks: u32) -> std::io::Result<()> {
        self.timeout_mux.add_write(fd)?;
        self.arm_timeout(fd, payload, timeout_ticks);
        Ok(())
    }

    pub fn mod_timed_write(&self, fd: RawFd, payload: ReactorPayload, timeout_ticks: u32) -> std::io::Result<()> {
        self.clear_timeout(fd);
        self.timeout_mux.mod_write_oneshot(fd)?;
        self.arm_timeout(fd, payload, timeout_ticks);
        Ok(())
    }

    /// Arm `fd` on the plain multiplexer, not tracked by the time wheel.
    pub fn add_plain_read(&self, fd: RawFd, payload: ReactorPayload) -> std::io::Result<()> {
        self.plain_mux.add_read(fd)?;
        self.lock.lock();
        unsafe { self.map_unchecked() }.insert(fd, ReactorData { payload, timer_id: None });
        self.lock.unlock();
        Ok(())
    }

    pub fn mod_plain_read(&self, fd: RawFd) -> std::io::Result<()> {
        self.plain_mux.mod_read_oneshot(fd)
    }

    fn arm_timeout(&self, fd: RawFd, payload: ReactorPayload, timeout_ticks: u32) {
        self.lock.lock();
        let timer_id = if timeout_ticks > 0 {
            self.wheel.set_timer(timeout_ticks, 0, fd).ok()
        } else {
            None
        };
        unsafe { self.map_unchecked() }.insert(fd, ReactorData { payload, timer_id });
        self.lock.unlock();
    }

    fn clear_timeout(&self, fd: RawFd) {
        self.lock.lock();
        if let Some(data) = unsafe { self.map_unchecked() }.get(&fd) {
            if let Some(id) = data.timer_id {
                self.wheel.del_timer(id);
            }
        }
        self.lock.unlock();
    }

    /// Detach `fd` from both multiplexers and drop its reactor-data entry.
    pub fn del(&self, fd: RawFd) {
        self.clear_timeout(fd);
        let _ = self.timeout_mux.del(fd);
        let _ = self.plain_mux.del(fd);
        self.lock.lock();
        unsafe { self.map_unchecked() }.remove(&fd);
        self.lock.unlock();
    }

    pub fn request_stop(&self) {
        self.is_end.store(true, Ordering::Release);
    }

    /// Run the reactor loop on the calling thread until `request_stop`.
    pub fn run(self: &Arc<Self>, handler: Arc<dyn ReactorHandler>) {
        let mut last_tick = Instant::now();
        let mut ready = Vec::new();

        while !self.is_end.load(Ordering::Acquire) {
            let mut elapsed = last_tick.elapsed();
            while elapsed >= TICK {
                let fired = self.wheel.tick();
                for f in fired {
                    if let Some(payload) = self.take_payload(f.user_arg) {
                        handler.on_event(self, f.user_arg, payload, ReactorEvent::Timeout);
                    }
                }
                last_tick += TICK;
                elapsed = last_tick.elapsed();
            }

            ready.clear();
            if let Err(e) = self.timeout_mux.wait(WAIT_SLICE, &mut ready) {
                tracing::error!(reactor = self.id, error = %e, "timeout multiplexer wait failed");
            }
            for ev in ready.drain(..) {
                self.clear_timeout(ev.fd);
                if let Some(payload) = self.lookup_payload(ev.fd) {
                    let kind = if ev.error {
                        ReactorEvent::Error
                    } else if ev.readable {
                        ReactorEvent::Readable
                    } else {
                        ReactorEvent::Writable
                    };
                    handler.on_event(self, ev.fd, payload, kind);
                }
            }

            ready.clear();
            if let Err(e) = self.plain_mux.wait(WAIT_SLICE, &mut ready) {
                tracing::error!(reactor = self.id, error = %e, "plain multiplexer wait failed");
            }
            for ev in ready.drain(..) {
                if let Some(payload) = self.lookup_payload(ev.fd) {
                    let kind = if ev.error {
                        ReactorEvent::Error
                    } else if ev.readable {
                        ReactorEvent::Readable
                    } else {
                        ReactorEvent::Writable
                    };
                    handler.on_event(self, ev.fd, payload, kind);
                }
            }
        }
    }

    fn lookup_payload(&self, fd: RawFd) -> Option<ReactorPayload> {
        self.lock.lock();
        let p = unsafe { self.map_unchecked() }.get(&fd).map(|d| d.payload);
        self.lock.unlock();
        p
    }

    /// Look up `fd`'s payload and clear its now-stale `timer_id`: the
    /// caller is handling the timer that just fired, and `TimeWheel::tick`
    /// has already freed that timer's slot-pool id (and may hand it to an
    /// unrelated timer on the very next `set_timer`). Leaving the old id in
    /// place would make a later `clear_timeout`/`del` call `del_timer` on
    /// that reused id.
    fn take_payload(&self, fd: RawFd) -> Option<ReactorPayload> {
        self.lock.lock();
        let p = unsafe { self.map_unchecked() }.get_mut(&fd).map(|d| {
            d.timer_id = None;
            d.payload
        });
        self.lock.unlock();
        p
    }
}
