// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Persistent-thread-per-worker pool: each worker blocks on its own task slot
// until dispatched, runs exactly one closure, then returns to idle. Used by
// PAT and the proxy bootstrap for work that shouldn't run on a reactor
// thread (DNS, slow auth callbacks).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::os_event::OsEvent;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Worker {
    slot: Mutex<Option<Task>>,
    event: OsEvent,
    busy: std::sync::atomic::AtomicBool,
}

/// A fixed-size pool of persistent worker threads.
pub struct ThreadPool {
    workers: Vec<Arc<Worker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    idle_count: AtomicUsize,
    shutting_down: Arc<std::sync::atomic::AtomicBool>,
}

impl ThreadPool {
    /// Spawn `n` workers (clamped to at least 1), blocking until every
    /// worker thread has started and is idle.
    pub fn new(n: usize) -> Self {
        let n = n.max(1);
        let shutting_down = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut workers = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);
        let started = Arc::new(OsEvent::new());
        let started_count = Arc::new(AtomicUsize::new(0));

        for id in 0..n {
            let worker = Arc::new(Worker {
                slot: Mutex::new(None),
                event: OsEvent::new(),
                busy: std::sync::atomic::AtomicBool::new(false),
            });
            workers.push(Arc::clone(&worker));
            let shutting_down = Arc::clone(&shutting_down);
            let started = Arc::clone(&started);
            let started_count = Arc::clone(&started_count);
            let handle = std::thread::Builder::new()
                .name(format!("pool-worker-{id}"))
                .spawn(move || {
                    started_count.fetch_add(1, Ordering::SeqCst);
                    started.notify();
                    worker_loop(worker, shutting_down);
                })
                .expect("spawn worker thread");
            handles.push(handle);
        }

        while started_count.load(Ordering::SeqCst) < n {
            started.wait_if(|| started_count.load(Ordering::SeqCst) < n, Some(Duration::from_millis(50)));
        }

        Self {
            workers,
            handles: Mutex::new(handles),
            idle_count: AtomicUsize::new(n),
            shutting_down,
        }
    }

    /// Block up to `wait` for an idle worker and return its index, or `None`
    /// on timeout.
    pub fn get_worker(&self, wait: Duration) -> Option<usize> {
        let deadline = std::time::Instant::now() + wait;
        loop {
            for (i, w) in self.workers.iter().enumerate() {
                if !w.busy.swap(true, Ordering::AcqRel) {
                    self.idle_count.fetch_sub(1, Ordering::AcqRel);
                    return Some(i);
                }
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    pub fn release_worker(&self, idx: usize) {
        self.workers[idx].busy.store(false, Ordering::Release);
        self.idle_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Enqueue exactly one task on worker `idx`. Caller must have obtained
    /// `idx` from [`ThreadPool::get_worker`] and not call this twice for the
    /// same acquisition.
    pub fn worker_task_start<F>(&self, idx: usize, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = &self.workers[idx];
        *worker.slot.lock().unwrap() = Some(Box::new(f));
        worker.event.notify();
    }

    /// Block until worker `idx` finishes its in-flight task.
    pub fn worker_task_join(&self, idx: usize) {
        let worker = &self.workers[idx];
        worker.event.wait_if(|| worker.slot.lock().unwrap().is_some(), None);
    }

    pub fn idle_count(&self) -> usize {
        self.idle_count.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(worker: Arc<Worker>, shutting_down: Arc<std::sync::atomic::AtomicBool>) {
    loop {
        let woke = worker.event.wait_if(
            || worker.slot.lock().unwrap().is_none() && !shutting_down.load(Ordering::Acquire),
            Some(Duration::from_millis(200)),
        );
        if shutting_down.load(Ordering::Acquire) {
            return;
        }
        if !woke {
            continue;
        }
        let task = worker.slot.lock().unwrap().take();
        if let Some(task) = task {
            task();
            *worker.slot.lock().unwrap() = None;
            worker.event.notify();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutting_down.store(true, Ordering::Release);
        for w in &self.workers {
            w.event.broadcast();
        }
        if let Ok(mut handles) = self.handles.lock() {
            for h in handles.drain(..) {
                let _ = h.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn new_pool_is_fully_idle() {
        let pool = ThreadPool::new(2);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn dispatch_and_join_runs_task() {
        let pool = ThreadPool::new(1);
        let counter = Arc::new(AtomicI32::new(0));
        let idx = pool.get_worker(Duration::from_secs(1)).unwrap();
        let c = Arc::clone(&counter);
        pool.worker_task_start(idx, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        pool.worker_task_join(idx);
        pool.release_worker(idx);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn size_zero_clamped_to_one() {
        let pool = ThreadPool::new(0);
        assert_eq!(pool.size(), 1);
    }
}
