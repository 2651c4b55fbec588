// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-process condition-variable wakeup, replacing the named cross-process
// waiter the original shared-memory transport used. Used by PAT peer queues
// to sleep until work arrives and by the reactor pool for shutdown signaling.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A generation-counter condvar. `wait_if` re-checks its predicate after each
/// wakeup so a `set`/`notify` that races ahead of the wait is never missed.
pub struct OsEvent {
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    generation: u64,
    quit: bool,
}

impl OsEvent {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { generation: 0, quit: false }),
            cond: Condvar::new(),
        }
    }

    /// Block while `pred()` is true and quit has not been signalled.
    /// Returns `false` on timeout, `true` if woken by a real notification
    /// (or if `pred` was already false, or quit was signalled).
    pub fn wait_if<F>(&self, mut pred: F, timeout: Option<Duration>) -> bool
    where
        F: FnMut() -> bool,
    {
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.quit || !pred() {
                return true;
            }
            let seen = guard.generation;
            guard = match timeout {
                Some(d) => {
                    let (g, res) = self.cond.wait_timeout(guard, d).unwrap();
                    if res.timed_out() && g.generation == seen {
                        return false;
                    }
                    g
                }
                None => self.cond.wait(guard).unwrap(),
            };
        }
    }

    /// Wake one waiter.
    pub fn notify(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.generation = guard.generation.wrapping_add(1);
        drop(guard);
        self.cond.notify_one();
    }

    /// Wake all waiters.
    pub fn broadcast(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.generation = guard.generation.wrapping_add(1);
        drop(guard);
        self.cond.notify_all();
    }

    /// Signal permanent quit and wake everyone.
    pub fn quit_waiting(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.quit = true;
        guard.generation = guard.generation.wrapping_add(1);
        drop(guard);
        self.cond.notify_all();
    }

    /// Whether `quit_waiting` has been called.
    pub fn is_quit(&self) -> bool {
        self.state.lock().unwrap().quit
    }
}

impl Default for OsEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_wakes_waiter() {
        let ev = Arc::new(OsEvent::new());
        let ready = Arc::new(AtomicBool::new(false));
        let ev2 = Arc::clone(&ev);
        let ready2 = Arc::clone(&ready);
        let t = thread::spawn(move || {
            ev2.wait_if(|| !ready2.load(Ordering::SeqCst), None);
        });
        thread::sleep(Duration::from_millis(20));
        ready.store(true, Ordering::SeqCst);
        ev.notify();
        t.join().unwrap();
    }

    #[test]
    fn wait_if_times_out() {
        let ev = OsEvent::new();
        let woke = ev.wait_if(|| true, Some(Duration::from_millis(10)));
        assert!(!woke);
    }

    #[test]
    fn quit_waiting_releases_all() {
        let ev = Arc::new(OsEvent::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ev2 = Arc::clone(&ev);
            handles.push(thread::spawn(move || {
                ev2.wait_if(|| !ev2.is_quit(), None);
            }));
        }
        thread::sleep(Duration::from_millis(20));
        ev.quit_waiting();
        for h in handles {
            h.join().unwrap();
        }
    }
}
