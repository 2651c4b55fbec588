// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-level 600-slot time wheel, 100 ms tick, with a rotation counter for
// delays longer than one revolution. Backs both the reactor's per-fd
// timeouts and the PAT layer's user timers.

use crate::error::TimerError;
use crate::slot_pool::SlotPool;
use crate::spin_lock::SpinLock;

/// Number of slots in the wheel.
pub const WHEEL_SIZE: usize = 600;

/// An opaque handle to a scheduled timer. Wraps the slot-pool id backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u32);

struct TimerNode<A> {
    rotation: u32,
    time_slot: usize,
    event_tag: u32,
    user_arg: A,
    /// Doubly-linked intrusive list within a wheel slot, by timer id.
    prev: Option<TimerId>,
    next: Option<TimerId>,
}

struct SlotList {
    head: Option<TimerId>,
    tail: Option<TimerId>,
}

impl SlotList {
    const fn empty() -> Self {
        Self { head: None, tail: None }
    }
}

/// A time wheel scheduling timers in units of 100 ms ticks.
///
/// `A` is the user-argument payload type delivered to the fire callback.
pub struct TimeWheel<A> {
    pool: SlotPool<TimerNode<A>>,
    state: SpinLock,
    inner: std::cell::UnsafeCell<Inner>,
}

struct Inner {
    slots: Vec<SlotList>,
    current: usize,
}

unsafe impl<A: Send> Send for TimeWheel<A> {}
unsafe impl<A: Send> Sync for TimeWheel<A> {}

/// A timer that fired during a `tick()` call.
pub struct FiredTimer<A> {
    pub id: TimerId,
    pub event_tag: u32,
    pub user_arg: A,
}

impl<A> TimeWheel<A> {
    /// Create a wheel with room for roughly `capacity_hint` concurrently
    /// scheduled timers.
    pub fn new(capacity_hint: usize) -> Self {
        let mut slots = Vec::with_capacity(WHEEL_SIZE);
        for _ in 0..WHEEL_SIZE {
            slots.push(SlotList::empty());
        }
        Self {
            pool: SlotPool::new(capacity_hint, 0),
            state: SpinLock::new(),
            inner: std::cell::UnsafeCell::new(Inner { slots, current: 0 }),
        }
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn inner_unchecked(&self) -> &mut Inner {
        &mut *self.inner.get()
    }

    /// Schedule a timer to fire after `delay_ticks` 100 ms ticks (minimum 1).
    pub fn set_timer(&self, delay_ticks: u32, event_tag: u32, user_arg: A) -> Result<TimerId, TimerError> {
        let t = delay_ticks.max(1) as usize;
        self.state.lock();
        let inner = unsafe { self.inner_unchecked() };
        let time_slot = (inner.current + t % WHEEL_SIZE) % WHEEL_SIZE;
        let rotation = (t / WHEEL_SIZE) as u32;
        self.state.unlock();

        let id = self
            .pool
            .alloc_with(TimerNode {
                rotation,
                time_slot,
                event_tag,
                user_arg,
                prev: None,
                next: None,
            })
            .map_err(|_| TimerError::OutOfTimers)?;
        let timer_id = TimerId(id);

        self.state.lock();
        let inner = unsafe { self.inner_unchecked() };
        self.link_tail(inner, time_slot, timer_id);
        self.state.unlock();
        Ok(timer_id)
    }

    /// Cancel a pending timer. No-op if already fired or unknown.
    pub fn del_timer(&self, id: TimerId) {
        self.state.lock();
        let inner = unsafe { self.inner_unchecked() };
        let slot = unsafe {
            match self.pool.get_by_id(id.0) {
                Ok(p) => (*p).time_slot,
                Err(_) => {
                    self.state.unlock();
                    return;
                }
            }
        };
        self.unlink(inner, slot, id);
        self.state.unlock();
        self.pool.free(id.0);
    }

    /// Reschedule an existing timer to fire after `delay_ticks` more ticks,
    /// measured from now. Returns a new [`TimerId`]; the old one is no
    /// longer valid. No-op-and-`Ok` semantics are not provided: callers must
    /// swap in the returned id.
    pub fn reset_timer(&self, id: TimerId, delay_ticks: u32) -> Result<TimerId, TimerError>
    where
        A: Default,
    {
        self.state.lock();
        let inner = unsafe { self.inner_unchecked() };
        let slot = match unsafe { self.pool.get_by_id(id.0) } {
            Ok(p) => unsafe { (*p).time_slot },
            Err(_) => {
                self.state.unlock();
                return Err(TimerError::OutOfTimers);
            }
        };
        self.unlink(inner, slot, id);
        let (event_tag, user_arg) = unsafe {
            let ptr = self.pool.get_by_id(id.0).expect("just checked");
            ((*ptr).event_tag, std::mem::take(&mut (*ptr).user_arg))
        };
        self.state.unlock();
        self.pool.free_to_tail(id.0);
        self.set_timer(delay_ticks, event_tag, user_arg)
    }

    fn link_tail(&self, inner: &mut Inner, slot: usize, id: TimerId) {
        let list = &mut inner.slots[slot];
        unsafe {
            if let Ok(ptr) = self.pool.get_by_id(id.0) {
                (*ptr).prev = list.tail;
                (*ptr).next = None;
            }
        }
        if let Some(tail) = list.tail {
            unsafe {
                if let Ok(ptr) = self.pool.get_by_id(tail.0) {
                    (*ptr).next = Some(id);
                }
            }
        } else {
            list.head = Some(id);
        }
        list.tail = Some(id);
    }

    fn unlink(&self, inner: &mut Inner, slot: usize, id: TimerId) {
        let (prev, next) = unsafe {
            match self.pool.get_by_id(id.0) {
                Ok(ptr) => ((*ptr).prev, (*ptr).next),
                Err(_) => return,
            }
        };
        let list = &mut inner.slots[slot];
        match prev {
            Some(p) => unsafe {
                if let Ok(ptr) = self.pool.get_by_id(p.0) {
                    (*ptr).next = next;
                }
            },
            None => list.head = next,
        }
        match next {
            Some(n) => unsafe {
                if let Ok(ptr) = self.pool.get_by_id(n.0) {
                    (*ptr).prev = prev;
                }
            },
            None => list.tail = prev,
        }
    }

    /// Advance the wheel by one slot, returning every timer that fired.
    /// Timers with a remaining `rotation > 0` are decremented and kept.
    pub fn tick(&self) -> Vec<FiredTimer<A>>
    where
        A: Default,
    {
        self.state.lock();
        let inner = unsafe { self.inner_unchecked() };
        let slot = inner.current;
        let mut fired = Vec::new();
        let mut cursor = inner.slots[slot].head;
        let mut still_pending: Vec<TimerId> = Vec::new();

        while let Some(id) = cursor {
            let next = unsafe {
                match self.pool.get_by_id(id.0) {
                    Ok(ptr) => (*ptr).next,
                    Err(_) => None,
                }
            };
            let fire_now = unsafe {
                match self.pool.get_by_id(id.0) {
                    Ok(ptr) => {
                        if (*ptr).rotation > 0 {
                            (*ptr).rotation -= 1;
                            false
                        } else {
                            true
                        }
                    }
                    Err(_) => false,
                }
            };
            if fire_now {
                let (event_tag, user_arg) = unsafe {
                    let ptr = self.pool.get_by_id(id.0).expect("just checked");
                    (
                        (*ptr).event_tag,
                        std::mem::replace(&mut (*ptr).user_arg, A::default()),
                    )
                };
                fired.push(FiredTimer { id, event_tag, user_arg });
            } else {
                still_pending.push(id);
            }
            cursor = next;
        }

        inner.slots[slot] = SlotList::empty();
        for id in still_pending {
            self.link_tail(inner, slot, id);
        }
        inner.current = (inner.current + 1) % WHEEL_SIZE;
        self.state.unlock();

        for f in &fired {
            self.pool.free_to_tail(f.id.0);
        }
        fired
    }

    /// Current wheel slot (for tests/diagnostics).
    pub fn current_slot(&self) -> usize {
        self.state.lock();
        let c = unsafe { self.inner_unchecked() }.current;
        self.state.unlock();
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_exact_tick() {
        let wheel: TimeWheel<u32> = TimeWheel::new(16);
        let id = wheel.set_timer(3, 7, 123).unwrap();
        assert!(wheel.tick().is_empty());
        assert!(wheel.tick().is_empty());
        let fired = wheel.tick();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id.0, id.0);
        assert_eq!(fired[0].event_tag, 7);
        assert_eq!(fired[0].user_arg, 123);
    }

    #[test]
    fn delay_zero_treated_as_one() {
        let wheel: TimeWheel<u32> = TimeWheel::new(16);
        wheel.set_timer(0, 1, 1).unwrap();
        let fired = wheel.tick();
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn del_timer_prevents_fire() {
        let wheel: TimeWheel<u32> = TimeWheel::new(16);
        let id = wheel.set_timer(2, 1, 1).unwrap();
        wheel.del_timer(id);
        wheel.tick();
        let fired = wheel.tick();
        assert!(fired.is_empty());
    }

    #[test]
    fn rotation_handles_delay_beyond_wheel_size() {
        let wheel: TimeWheel<u32> = TimeWheel::new(16);
        let delay = (WHEEL_SIZE as u32) + 5;
        wheel.set_timer(delay, 1, 99).unwrap();
        for _ in 0..WHEEL_SIZE + 4 {
            assert!(wheel.tick().is_empty());
        }
        let fired = wheel.tick();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].user_arg, 99);
    }

    #[test]
    fn multiple_timers_in_same_slot_all_fire() {
        let wheel: TimeWheel<u32> = TimeWheel::new(16);
        wheel.set_timer(1, 1, 10).unwrap();
        wheel.set_timer(1, 1, 20).unwrap();
        wheel.set_timer(1, 1, 30).unwrap();
        let fired = wheel.tick();
        let mut args: Vec<u32> = fired.iter().map(|f| f.user_arg).collect();
        args.sort();
        assert_eq!(args, vec![10, 20, 30]);
    }
}
