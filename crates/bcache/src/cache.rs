//! Cache facade: acquire / load / store / release / pin / unpin.
//!
//! # Lock protocol
//!
//! Three lock classes, in the only legal acquisition order
//! shard → pool → content:
//!
//! - **shard lock**: guards one bucket's membership and the refcounts of
//!   its members. Short critical sections, no I/O, no sleeping inside.
//! - **pool lock**: guards victim selection and reclamation. Taken while
//!   holding a shard lock (never the reverse) on both the miss path and
//!   the refcount-to-zero path, held only for one `pick`/`reclaim` call,
//!   so a slot is never in neither the shard nor the pool.
//! - **content lock**: one per slot, exclusive and sleep-capable, guards
//!   payload and validity. The hit path acquires it only after every
//!   shard/pool lock is released; this is the only place a task waits
//!   unboundedly (another holder may itself be waiting on disk). The
//!   miss path acquires the victim's content lock while still holding
//!   the shard lock — an uncontended acquisition, since a picked slot
//!   has refcount zero and stays unreachable until the shard lock
//!   drops — so the victim is invalidated before its new key is
//!   visible. Never held while requesting a shard or pool lock —
//!   release drops it before touching the directory.
//!
//! No lock is ever held across a disk transfer or a content-lock wait
//! except the content lock of the slot being transferred, which is
//! exactly the single-writer guarantee callers rely on.

use crate::counters::{CacheCounters, CountersSnapshot};
use crate::device::BlockDevice;
use crate::pool::{self, ReplacementPool};
use crate::shard::{Directory, Resident};
use crate::slot::{self, Slot, SlotContent};
use bcache_error::Result;
use bcache_types::{BlockKey, BlockNumber, CacheGeometry, DeviceId};
use parking_lot::{Mutex, MutexGuard};
use tracing::{error, info, trace};

/// Sharded block-buffer cache over a [`BlockDevice`].
///
/// Constructed once, explicitly, and shared by reference (typically via
/// `Arc`); all synchronization is interior. There is no global instance
/// and no implicit default state.
#[derive(Debug)]
pub struct BufCache<D: BlockDevice> {
    device: D,
    geometry: CacheGeometry,
    slots: Box<[Slot]>,
    directory: Directory,
    pool: Mutex<Box<dyn ReplacementPool>>,
    counters: CacheCounters,
}

impl<D: BlockDevice> BufCache<D> {
    /// Build the cache: slot arena, shard directory, and replacement pool
    /// are all sized here and never resized.
    pub fn new(device: D, geometry: CacheGeometry) -> Self {
        info!(
            slots = geometry.slots(),
            shards = geometry.shards(),
            block_size = geometry.block_size().get(),
            policy = ?geometry.policy(),
            "bcache: initializing"
        );
        Self {
            device,
            slots: slot::arena(geometry.slots(), geometry.block_size().as_usize()),
            directory: Directory::new(geometry.shards()),
            pool: Mutex::new(pool::new_pool(geometry.policy(), geometry.slots())),
            counters: CacheCounters::default(),
            geometry,
        }
    }

    #[must_use]
    pub fn geometry(&self) -> CacheGeometry {
        self.geometry
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Point-in-time counter values.
    #[must_use]
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Number of slots currently unreferenced and eligible for eviction.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.pool.lock().free_slots()
    }

    /// Current reference count of a resident block, for diagnostics.
    #[must_use]
    pub fn refcount(&self, device: DeviceId, block: BlockNumber) -> Option<u32> {
        let key = BlockKey::new(device, block);
        let dir = self.directory.shard(key).lock();
        dir.get(&key).map(|entry| entry.refcount)
    }

    /// Flush the underlying device.
    pub fn sync(&self) -> Result<()> {
        self.device.sync()
    }

    /// Get the block `(device, block)` with its content lock held.
    ///
    /// Hit: the refcount is bumped and the existing payload/validity is
    /// returned as-is. Miss: a victim is taken from the replacement pool
    /// and, still under the shard lock, invalidated (unless its stale key
    /// already matched) and inserted under the new key. May sleep waiting
    /// for another holder of the same block; never sleeps while a shard
    /// or pool lock is held.
    ///
    /// Panics if every slot is referenced or pinned (pool exhaustion is
    /// fatal; there is no graceful degradation). Re-acquiring a block the
    /// calling thread already holds deadlocks, as with any exclusive lock.
    pub fn acquire(&self, device: DeviceId, block: BlockNumber) -> BlockGuard<'_, D> {
        let key = BlockKey::new(device, block);
        let shard = self.directory.shard(key);
        let mut dir = shard.lock();

        if let Some(entry) = dir.get_mut(&key) {
            // Find-or-mark: the bump happens in the same critical section
            // as the lookup, so a concurrent release cannot evict the slot
            // between the two.
            entry.refcount = entry.refcount.checked_add(1).expect("refcount overflow");
            let slot = entry.slot;
            drop(dir);
            self.counters.hit();
            trace!(device = key.device.0, block = key.block.0, slot, "bcache_hit");
            let content = self.slots[slot as usize].content.lock();
            return BlockGuard {
                cache: self,
                key,
                slot,
                content: Some(content),
            };
        }

        // Miss. Pool lock nests inside the shard lock (shard → pool) and
        // is held only for the selection step.
        let picked = self.pool.lock().pick(key);
        let Some(victim) = picked else {
            error!(%key, slots = self.slots.len(), "bcache: pool exhausted on miss");
            panic!(
                "bcache: no free slot for {key}: all {} slots referenced or pinned",
                self.slots.len()
            );
        };
        // The victim's content lock is uncontended: its refcount was zero
        // and the slot stays unreachable until this shard lock is
        // released, so this never sleeps with the shard lock held.
        let mut content = self.slots[victim.slot as usize].content.lock();
        if !victim.stale_hit {
            // Invalidate before the insert becomes visible: a hit racing
            // with this re-key must never see the old key's payload.
            content.valid = false;
        }
        dir.insert(
            key,
            Resident {
                slot: victim.slot,
                refcount: 1,
            },
        );
        drop(dir);

        self.counters.miss();
        if victim.stale_hit {
            self.counters.stale_rescue();
            trace!(
                device = key.device.0,
                block = key.block.0,
                slot = victim.slot,
                "bcache_stale_rescue"
            );
        } else {
            self.counters.eviction();
            trace!(
                device = key.device.0,
                block = key.block.0,
                slot = victim.slot,
                "bcache_miss"
            );
        }

        BlockGuard {
            cache: self,
            key,
            slot: victim.slot,
            content: Some(content),
        }
    }

    /// Drop one pin reference. At zero the slot is unlinked from its
    /// shard and handed back to the replacement pool, exactly like a
    /// release.
    ///
    /// Panics if the block is not resident or the refcount would go
    /// negative (fatal usage errors).
    pub fn unpin(&self, pinned: BlockRef) {
        self.decref(pinned.key, "unpin");
    }

    /// Refcount increment under the shard lock. No content lock involved.
    fn incref(&self, key: BlockKey) {
        let mut dir = self.directory.shard(key).lock();
        let Some(entry) = dir.get_mut(&key) else {
            panic!("bcache: pin of non-resident block {key}");
        };
        entry.refcount = entry.refcount.checked_add(1).expect("refcount overflow");
    }

    /// Refcount decrement under the shard lock; at zero, unlink from the
    /// shard and reclaim under the pool lock, both before the shard lock
    /// is released. Caller must not hold the slot's content lock.
    fn decref(&self, key: BlockKey, what: &str) {
        let mut dir = self.directory.shard(key).lock();
        let Some(entry) = dir.get_mut(&key) else {
            panic!("bcache: {what} of non-resident block {key}");
        };
        let Some(rest) = entry.refcount.checked_sub(1) else {
            panic!("bcache: refcount underflow on {what} of {key}");
        };
        entry.refcount = rest;
        if rest > 0 {
            return;
        }
        let slot = entry.slot;
        dir.remove(&key);
        // Reclaim before the shard lock drops. A slot must never be in
        // neither the shard nor the pool: a concurrent miss in that
        // window would see exhaustion that is not real.
        self.pool.lock().reclaim(slot, key);
        drop(dir);
        trace!(device = key.device.0, block = key.block.0, slot, "bcache_reclaim");
    }
}

/// A pin reference: extra refcount held independently of any
/// acquire/release pair. Copyable; pass it back to [`BufCache::unpin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    key: BlockKey,
}

impl BlockRef {
    #[must_use]
    pub const fn new(device: DeviceId, block: BlockNumber) -> Self {
        Self {
            key: BlockKey::new(device, block),
        }
    }

    #[must_use]
    pub fn key(self) -> BlockKey {
        self.key
    }
}

/// Exclusive handle to one resident block; holding the guard IS holding
/// the slot's content lock, so the "caller must hold the lock"
/// preconditions of load/store are enforced by the type system.
///
/// Dropping the guard releases: content lock first (waiters proceed
/// immediately), then the reference count under the shard lock.
#[derive(Debug)]
pub struct BlockGuard<'a, D: BlockDevice> {
    cache: &'a BufCache<D>,
    key: BlockKey,
    slot: u32,
    content: Option<MutexGuard<'a, SlotContent>>,
}

impl<D: BlockDevice> BlockGuard<'_, D> {
    #[must_use]
    pub fn key(&self) -> BlockKey {
        self.key
    }

    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.key.device
    }

    #[must_use]
    pub fn block(&self) -> BlockNumber {
        self.key.block
    }

    /// Whether the payload currently reflects on-disk content.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.content().valid
    }

    /// The block's bytes, reading from the device first if the payload is
    /// not valid. A valid payload is returned unchanged, with no I/O.
    pub fn load(&mut self) -> Result<&[u8]> {
        self.ensure_loaded()?;
        Ok(&self.content().payload)
    }

    /// Mutable variant of [`Self::load`] for read-modify-write cycles.
    pub fn load_mut(&mut self) -> Result<&mut [u8]> {
        self.ensure_loaded()?;
        Ok(&mut self.content_mut().payload)
    }

    /// Write the payload to the device as-is. A never-loaded payload is
    /// written unchanged (all zeros for a fresh slot); after a successful
    /// store the payload reflects on-disk content, so it becomes valid.
    pub fn store(&mut self) -> Result<()> {
        self.cache
            .device
            .write_block(self.key, &self.content().payload)?;
        self.content_mut().valid = true;
        self.cache.counters.write();
        trace!(
            device = self.key.device.0,
            block = self.key.block.0,
            slot = self.slot,
            "bcache_store"
        );
        Ok(())
    }

    /// Replace the whole payload without reading the device first, for
    /// full-block overwrites. Marks the payload valid; pair with
    /// [`Self::store`] to persist it.
    ///
    /// Panics if `src` is not exactly one block.
    pub fn fill(&mut self, src: &[u8]) {
        let key = self.key;
        let content = self.content_mut();
        assert_eq!(
            src.len(),
            content.payload.len(),
            "bcache: fill of {key} with a non-block-sized buffer"
        );
        content.payload.copy_from_slice(src);
        content.valid = true;
    }

    /// Take an extra reference that outlives this guard, keeping the slot
    /// resident across otherwise-independent acquire/release pairs. The
    /// pool never treats pinned slots specially; they are excluded from
    /// victim selection purely because the refcount is nonzero.
    #[must_use]
    pub fn pin(&self) -> BlockRef {
        self.cache.incref(self.key);
        BlockRef { key: self.key }
    }

    /// Explicit release; equivalent to dropping the guard.
    pub fn release(self) {}

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.content().valid {
            return Ok(());
        }
        let cache = self.cache;
        let key = self.key;
        let slot = self.slot;
        let content = self.content_mut();
        cache.device.read_block(key, &mut content.payload)?;
        content.valid = true;
        cache.counters.read();
        trace!(device = key.device.0, block = key.block.0, slot, "bcache_load");
        Ok(())
    }

    fn content(&self) -> &SlotContent {
        self.content
            .as_deref()
            .expect("content lock held until release")
    }

    fn content_mut(&mut self) -> &mut SlotContent {
        self.content
            .as_deref_mut()
            .expect("content lock held until release")
    }
}

impl<D: BlockDevice> Drop for BlockGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(content) = self.content.take() {
            // Content lock first, so waiters can proceed while we take
            // the shard lock.
            drop(content);
            self.cache.decref(self.key, "release");
        }
    }
}
