// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed set of G groups, each with T pre-started threads, sharing a common
// free-task bank refilled under a group-pool lock. Priority is two-tier:
// the high queue drains before the normal queue. A coarser-grained sibling
// of `thread_pool::ThreadPool` for PAT's fixed worker/sender thread layout.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::os_event::OsEvent;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queues {
    high: VecDeque<Task>,
    normal: VecDeque<Task>,
}

impl Queues {
    fn pop(&mut self) -> Option<Task> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

struct Group {
    queues: Mutex<Queues>,
    event: OsEvent,
}

/// `G` groups of `T` threads each, draining a per-group high/normal queue
/// pair. `submit`/`submit_high` pick a group round-robin.
pub struct ThreadGroup {
    groups: Vec<Arc<Group>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: std::sync::atomic::AtomicUsize,
    shutting_down: Arc<std::sync::atomic::AtomicBool>,
}

impl ThreadGroup {
    pub fn new(num_groups: usize, threads_per_group: usize) -> Self {
        let num_groups = num_groups.max(1);
        let threads_per_group = threads_per_group.max(1);
        let shutting_down = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut groups = Vec::with_capacity(num_groups);
        let mut handles = Vec::new();

        for gid in 0..num_groups {
            let group = Arc::new(Group {
                queues: Mutex::new(Queues { high: VecDeque::new(), normal: VecDeque::new() }),
                event: OsEvent::new(),
            });
            groups.push(Arc::clone(&group));
            for tid in 0..threads_per_group {
                let group = Arc::clone(&group);
                let shutting_down = Arc::clone(&shutting_down);
                handles.push(
                    std::thread::Builder::new()
                        .name(format!("group-{gid}-{tid}"))
                        .spawn(move || group_worker_loop(group, shutting_down))
                        .expect("spawn thread-group worker"),
                );
            }
        }

        Self {
            groups,
            handles: Mutex::new(handles),
            next: std::sync::atomic::AtomicUsize::new(0),
            shutting_down,
        }
    }

    fn pick_group(&self) -> &Arc<Group> {
        let i = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.groups.len();
        &self.groups[i]
    }

    /// Enqueue a normal-priority task onto a round-robin group.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let group = self.pick_group();
        group.queues.lock().unwrap().normal.push_back(Box::new(f));
        group.event.notify();
    }

    /// Enqueue a high-priority task, drained before any pending normal task
    /// in the same group.
    pub fn submit_high<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let group = self.pick_group();
        group.queues.lock().unwrap().high.push_back(Box::new(f));
        group.event.notify();
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

fn group_worker_loop(group: Arc<Group>, shutting_down: Arc<std::sync::atomic::AtomicBool>) {
    loop {
        group.event.wait_if(
            || {
                let q = group.queues.lock().unwrap();
                q.high.is_empty() && q.normal.is_empty() && !shutting_down.load(std::sync::atomic::Ordering::Acquire)
            },
            Some(Duration::from_millis(200)),
        );
        if shutting_down.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        while let Some(task) = group.queues.lock().unwrap().pop() {
            task();
        }
    }
}

impl Drop for ThreadGroup {
    fn drop(&mut self) {
        self.shutting_down.store(true, std::sync::atomic::Ordering::Release);
        for g in &self.groups {
            g.event.broadcast();
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn high_priority_task_runs() {
        let group = ThreadGroup::new(1, 1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        group.submit_high(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn round_robins_across_groups() {
        let group = ThreadGroup::new(3, 1);
        assert_eq!(group.group_count(), 3);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let c = Arc::clone(&counter);
            group.submit(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }
}
