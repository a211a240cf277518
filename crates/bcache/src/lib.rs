#![forbid(unsafe_code)]
//! Sharded block-buffer cache with pluggable replacement policies.
//!
//! A fixed pool of in-memory slots caching fixed-size disk blocks, shared
//! by many threads. The cache provides single-writer-per-block semantics
//! (an acquired block comes back with its exclusive content lock held),
//! concurrent lookup/insertion under per-shard locks, and a bounded
//! eviction pool with two interchangeable victim-selection strategies.
//!
//! # Interface
//!
//! - [`BufCache::acquire`] returns a [`BlockGuard`] with the block's
//!   content lock held; it blocks only on that lock, never while holding
//!   a shard or pool lock.
//! - [`BlockGuard::load`] / [`BlockGuard::load_mut`] fetch the block from
//!   the [`BlockDevice`] on first use and return cached bytes thereafter.
//! - [`BlockGuard::store`] writes the payload back;
//!   [`BlockGuard::fill`] overwrites a full block without a prior read.
//! - Dropping the guard (or [`BlockGuard::release`]) releases; at
//!   refcount zero the slot becomes eligible for eviction.
//! - [`BlockGuard::pin`] / [`BufCache::unpin`] keep a block resident
//!   across independent acquire/release pairs.
//!
//! # Design
//!
//! Three leaf components behind the facade: the slot arena (payload +
//! validity under per-slot content locks), the shard directory (key →
//! slot resolution under per-bucket locks), and the replacement pool
//! (recency-list or bitmap strategy under one pool-wide lock). The legal
//! lock order is shard → pool → content;
//! content locks are only ever taken with the short locks released, so a
//! thread sleeping on a busy block never stalls unrelated lookups.
//!
//! Fatal conditions (pool exhaustion, refcount underflow, misuse of a
//! non-resident block) panic; device I/O failures propagate as
//! [`CacheError`] results.

mod cache;
mod counters;
mod device;
mod pool;
mod shard;
mod slot;

pub use bcache_error::{CacheError, Result};
pub use bcache_types::{
    BlockKey, BlockNumber, BlockSize, CacheGeometry, DeviceId, EvictionPolicy, GeometryError,
};

pub use cache::{BlockGuard, BlockRef, BufCache};
pub use counters::{CacheCounters, CountersSnapshot};
pub use device::{BlockDevice, FileBlockDevice};

/// Convert a construction-time geometry error into the runtime error
/// type. Lives here because `bcache-error` stays independent of
/// `bcache-types`; this crate is the boundary that knows both.
#[must_use]
pub fn geometry_error(err: GeometryError) -> CacheError {
    CacheError::Geometry(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_errors_convert_with_detail() {
        let err = BlockSize::new(100).expect_err("invalid block size");
        let converted = geometry_error(err);
        assert!(matches!(converted, CacheError::Geometry(_)));
        assert!(converted.to_string().contains("block_size"));
    }
}
