//! Shard directory: key-to-slot resolution under fine-grained locks.
//!
//! The directory is a fixed array of independently locked shards, so
//! lookups and insertions for different keys mostly proceed in parallel.
//! A shard's lock guards chain membership and the refcounts of its
//! members only — never payloads or validity, which belong to each
//! slot's content lock.
//!
//! Shard locks are short critical sections: nothing inside them blocks,
//! sleeps, or performs I/O.

use bcache_types::BlockKey;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Directory entry for a resident slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resident {
    /// Index into the slot arena.
    pub slot: u32,
    /// Count of active holders (acquires and pins). Never negative;
    /// underflow is a fatal error caught by the facade.
    pub refcount: u32,
}

/// One bucket: the resident keys that hash here.
pub(crate) type Shard = HashMap<BlockKey, Resident>;

/// Fixed array of independently locked shards.
#[derive(Debug)]
pub(crate) struct Directory {
    shards: Box<[Mutex<Shard>]>,
}

impl Directory {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count)
            .map(|_| Mutex::new(Shard::new()))
            .collect();
        Self { shards }
    }

    /// Map a key to its shard index. Deterministic.
    #[inline]
    fn index(&self, key: BlockKey) -> usize {
        let count = u64::try_from(self.shards.len()).expect("shard count must fit in u64");
        let rem = key.mix() % count;
        usize::try_from(rem).expect("remainder must fit in usize")
    }

    /// The shard lock for `key`.
    #[inline]
    pub fn shard(&self, key: BlockKey) -> &Mutex<Shard> {
        &self.shards[self.index(key)]
    }
}
