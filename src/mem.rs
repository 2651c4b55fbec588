// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Optional fixed-size buffer pool, independent of the id-stable slot pool
// used by the reactor and time wheel (see `slot_pool.rs`). Feature-gated
// behind `slab_pool`; not wired into the hot path by default.

// ---------------------------------------------------------------------------
// SlabPool — fixed-size object pool (mirrors block_pool / central_cache_pool)
// ---------------------------------------------------------------------------

/// A pool of fixed-size byte buffers backed by `slab::Slab`.
///
/// `insert` claims a slot and returns a stable key; `remove` returns the slot
/// to the pool. The pool grows automatically (no fixed upper bound, unlike
/// [`crate::slot_pool::SlotPool`]).
///
/// The pool is **not** `Send`; wrap in `Mutex` for shared use.
#[cfg(feature = "slab_pool")]
pub struct SlabPool<const BLOCK: usize> {
    slab: slab::Slab<[u8; BLOCK]>,
}

#[cfg(feature = "slab_pool")]
impl<const BLOCK: usize> SlabPool<BLOCK> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            slab: slab::Slab::new(),
        }
    }

    /// Create a pool pre-allocated for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slab: slab::Slab::with_capacity(capacity),
        }
    }

    /// Insert a zeroed block and return its stable key.
    pub fn insert_zeroed(&mut self) -> usize {
        self.slab.insert([0u8; BLOCK])
    }

    /// Insert a block initialised from `src` (truncated / zero-padded to `BLOCK`).
    pub fn insert_from_slice(&mut self, src: &[u8]) -> usize {
        let mut block = [0u8; BLOCK];
        let n = src.len().min(BLOCK);
        block[..n].copy_from_slice(&src[..n]);
        self.slab.insert(block)
    }

    /// Get a shared reference to the block at `key`.
    pub fn get(&self, key: usize) -> Option<&[u8; BLOCK]> {
        self.slab.get(key)
    }

    /// Get a mutable reference to the block at `key`.
    pub fn get_mut(&mut self, key: usize) -> Option<&mut [u8; BLOCK]> {
        self.slab.get_mut(key)
    }

    /// Return the block at `key` to the pool.
    pub fn remove(&mut self, key: usize) -> [u8; BLOCK] {
        self.slab.remove(key)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slab.len()
    }

    /// Whether the pool has no occupied slots.
    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// Total capacity (occupied + free slots).
    pub fn capacity(&self) -> usize {
        self.slab.capacity()
    }
}

#[cfg(feature = "slab_pool")]
impl<const BLOCK: usize> Default for SlabPool<BLOCK> {
    fn default() -> Self {
        Self::new()
    }
}
