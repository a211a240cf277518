//! Replacement pool: free-slot tracking and victim selection.
//!
//! Two interchangeable strategies behind one trait, selected at cache
//! construction:
//!
//! - [`RecencyPool`]: a recency list. `reclaim` pushes the freed slot to
//!   the front, `pick` pops the back (the slot freed longest ago), so
//!   eviction approximates LRU. O(1) both ways for the common path.
//! - [`BitmapPool`]: a named bit-set over slot indices. `pick` takes the
//!   lowest free index, O(pool size), with no recency ordering — any free
//!   slot may be reused. Simpler bookkeeping, weaker temporal locality.
//!
//! Both guarantee that a picked slot has refcount zero and is resident
//! under no key: the facade unlinks a slot from its shard atomically with
//! the refcount-to-zero transition, before `reclaim` is called, so the
//! pool never has to touch a shard.
//!
//! # Stale-key rescue
//!
//! A freed slot keeps its last key and payload. Each strategy remembers
//! that stale key; when `pick` is asked for a key that matches a free
//! slot's stale key, that slot is returned with `stale_hit` set and the
//! facade skips invalidation, so a release/re-acquire of the same key
//! with no intervening eviction costs no read I/O.
//!
//! The pool-wide lock around the strategy lives in the facade and is held
//! only for the duration of a single `pick` or `reclaim` call.

use bcache_types::BlockKey;
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// A slot chosen for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Victim {
    /// Index into the slot arena.
    pub slot: u32,
    /// The slot's stale key equals the requested key; its payload is
    /// still good for that key and must not be invalidated.
    pub stale_hit: bool,
}

/// Victim selection and reclamation. Called only under the pool lock.
pub(crate) trait ReplacementPool: Send + fmt::Debug {
    /// Choose a free slot for `want`, removing it from the free set.
    /// Returns `None` when every slot is referenced or pinned.
    fn pick(&mut self, want: BlockKey) -> Option<Victim>;

    /// Return a slot to the free set. `key` is the key the slot was
    /// resident under when its refcount reached zero.
    fn reclaim(&mut self, slot: u32, key: BlockKey);

    /// Number of slots currently free.
    fn free_slots(&self) -> usize;
}

pub(crate) fn new_pool(
    policy: bcache_types::EvictionPolicy,
    slots: usize,
) -> Box<dyn ReplacementPool> {
    match policy {
        bcache_types::EvictionPolicy::Recency => Box::new(RecencyPool::new(slots)),
        bcache_types::EvictionPolicy::Bitmap => Box::new(BitmapPool::new(slots)),
    }
}

// ── Stale-key table ─────────────────────────────────────────────────────

/// Maps stale keys of free slots back to their slot index.
///
/// An entry can be superseded: if a key was re-acquired into a different
/// slot while the old one sat free, the newer release overwrites the
/// mapping. `forget` therefore only removes the by-key entry when it
/// still points at the slot being forgotten.
#[derive(Debug)]
struct StaleTable {
    by_key: HashMap<BlockKey, u32>,
    last_key: Vec<Option<BlockKey>>,
}

impl StaleTable {
    fn new(slots: usize) -> Self {
        Self {
            by_key: HashMap::new(),
            last_key: vec![None; slots],
        }
    }

    /// Record `key` as the stale key of freed `slot`.
    fn record(&mut self, slot: u32, key: BlockKey) {
        self.last_key[slot as usize] = Some(key);
        self.by_key.insert(key, slot);
    }

    /// If a free slot's stale key equals `want`, claim and return it.
    fn take_match(&mut self, want: BlockKey) -> Option<u32> {
        let slot = self.by_key.remove(&want)?;
        self.last_key[slot as usize] = None;
        Some(slot)
    }

    /// Drop the stale record of `slot` (it is being re-keyed).
    fn forget(&mut self, slot: u32) {
        if let Some(key) = self.last_key[slot as usize].take() {
            if self.by_key.get(&key) == Some(&slot) {
                self.by_key.remove(&key);
            }
        }
    }
}

// ── Policy A: recency list ──────────────────────────────────────────────

/// Free list ordered by reclaim recency: front is most-recently-freed,
/// back is the next generic victim.
#[derive(Debug)]
pub(crate) struct RecencyPool {
    order: VecDeque<u32>,
    stale: StaleTable,
}

impl RecencyPool {
    pub fn new(slots: usize) -> Self {
        let count = u32::try_from(slots).expect("slot count must fit in u32");
        Self {
            order: (0..count).collect(),
            stale: StaleTable::new(slots),
        }
    }
}

impl ReplacementPool for RecencyPool {
    fn pick(&mut self, want: BlockKey) -> Option<Victim> {
        if let Some(slot) = self.stale.take_match(want) {
            let pos = self
                .order
                .iter()
                .position(|&s| s == slot)
                .expect("stale slot must be on the free list");
            self.order.remove(pos);
            return Some(Victim {
                slot,
                stale_hit: true,
            });
        }
        let slot = self.order.pop_back()?;
        self.stale.forget(slot);
        Some(Victim {
            slot,
            stale_hit: false,
        })
    }

    fn reclaim(&mut self, slot: u32, key: BlockKey) {
        debug_assert!(!self.order.contains(&slot), "double reclaim of slot {slot}");
        self.order.push_front(slot);
        self.stale.record(slot, key);
    }

    fn free_slots(&self) -> usize {
        self.order.len()
    }
}

// ── Policy B: bitmap ────────────────────────────────────────────────────

/// Free/busy bit per slot over `u64` words. Bit set means free.
#[derive(Debug)]
pub(crate) struct FreeMap {
    words: Vec<u64>,
    len: usize,
    free: usize,
}

impl FreeMap {
    /// All `len` slots start free.
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(64);
        let mut words = vec![u64::MAX; word_count];
        // Clear the tail bits beyond `len` so scans never see them.
        let tail = len % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1_u64 << tail) - 1;
            }
        }
        Self {
            words,
            len,
            free: len,
        }
    }

    #[must_use]
    pub fn is_free(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn mark_free(&mut self, idx: usize) {
        debug_assert!(!self.is_free(idx), "double free of slot {idx}");
        self.words[idx / 64] |= 1 << (idx % 64);
        self.free += 1;
    }

    pub fn mark_busy(&mut self, idx: usize) {
        debug_assert!(self.is_free(idx), "marking busy slot {idx} busy again");
        self.words[idx / 64] &= !(1 << (idx % 64));
        self.free -= 1;
    }

    /// Lowest free index, if any. O(len / 64).
    #[must_use]
    pub fn find_first_free(&self) -> Option<usize> {
        for (word_idx, &word) in self.words.iter().enumerate() {
            if word != 0 {
                let idx = word_idx * 64 + word.trailing_zeros() as usize;
                debug_assert!(idx < self.len);
                return Some(idx);
            }
        }
        None
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free
    }
}

/// Bitmap strategy: no recency ordering, lowest free index wins.
#[derive(Debug)]
pub(crate) struct BitmapPool {
    map: FreeMap,
    stale: StaleTable,
}

impl BitmapPool {
    pub fn new(slots: usize) -> Self {
        Self {
            map: FreeMap::new(slots),
            stale: StaleTable::new(slots),
        }
    }
}

impl ReplacementPool for BitmapPool {
    fn pick(&mut self, want: BlockKey) -> Option<Victim> {
        if let Some(slot) = self.stale.take_match(want) {
            self.map.mark_busy(slot as usize);
            return Some(Victim {
                slot,
                stale_hit: true,
            });
        }
        let idx = self.map.find_first_free()?;
        self.map.mark_busy(idx);
        let slot = u32::try_from(idx).expect("slot index must fit in u32");
        self.stale.forget(slot);
        Some(Victim {
            slot,
            stale_hit: false,
        })
    }

    fn reclaim(&mut self, slot: u32, key: BlockKey) {
        self.map.mark_free(slot as usize);
        self.stale.record(slot, key);
    }

    fn free_slots(&self) -> usize {
        self.map.free_count()
    }
}
