#![forbid(unsafe_code)]
//! Shared primitive types for the bcache workspace.
//!
//! Unit-carrying newtypes prevent mixing device ids, block numbers, and
//! byte offsets. [`CacheGeometry`] validates the cache's compile-time-ish
//! knobs (slot count, shard count, block size) once, at construction, so
//! the core never has to re-check them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default number of shard buckets. Odd, to avoid pathological clustering
/// when block numbers share a stride.
pub const DEFAULT_SHARD_COUNT: usize = 13;

/// Default number of cache slots.
pub const DEFAULT_SLOT_COUNT: usize = 64;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Geometry validation error (construction-time only).
///
/// Runtime errors live in `bcache-error`; this crate stays independent of
/// it so the conversion happens at the `bcache` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct GeometryError {
    pub field: &'static str,
    pub reason: &'static str,
}

/// Identifier of a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Block number on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// Cache key: one block on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    pub device: DeviceId,
    pub block: BlockNumber,
}

impl BlockKey {
    #[must_use]
    pub const fn new(device: DeviceId, block: BlockNumber) -> Self {
        Self { device, block }
    }

    /// 64-bit mix of device and block for shard selection.
    ///
    /// Folds the device id into the high bits, then multiplies by a large
    /// odd constant so that consecutive block numbers spread across shards
    /// even when the shard count divides their stride.
    #[must_use]
    pub fn mix(self) -> u64 {
        let folded = (u64::from(self.device.0) << 32) ^ self.block.0;
        folded.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.device.0, self.block.0)
    }
}

/// Validated block size (must be a power of two in 1024..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    pub const DEFAULT: Self = Self(DEFAULT_BLOCK_SIZE);

    /// Create a `BlockSize` if `value` is a power of two in [1024, 65536].
    pub fn new(value: u32) -> Result<Self, GeometryError> {
        if !value.is_power_of_two() || !(1024..=65536).contains(&value) {
            return Err(GeometryError {
                field: "block_size",
                reason: "must be power of two in 1024..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Block size as a buffer length.
    #[must_use]
    pub fn as_usize(self) -> usize {
        // Block sizes are at most 65536, which fits any supported usize.
        self.0 as usize
    }

    /// Number of bits to shift to convert between bytes and blocks.
    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Convert a block number to a byte offset.
    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> Option<u64> {
        block.0.checked_mul(u64::from(self.0))
    }
}

/// Victim-selection strategy for the replacement pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Recency list: evict the slot freed longest ago (approximate LRU).
    #[default]
    Recency,
    /// Bitmap: evict the lowest-indexed free slot, no recency ordering.
    /// Simpler bookkeeping, weaker temporal locality.
    Bitmap,
}

/// Validated cache geometry: slot count, shard count, block size, policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheGeometry {
    slots: usize,
    shards: usize,
    block_size: BlockSize,
    policy: EvictionPolicy,
}

impl CacheGeometry {
    /// Create a geometry if `slots` and `shards` are both nonzero.
    pub fn new(
        slots: usize,
        shards: usize,
        block_size: BlockSize,
        policy: EvictionPolicy,
    ) -> Result<Self, GeometryError> {
        if slots == 0 {
            return Err(GeometryError {
                field: "slots",
                reason: "must be at least 1",
            });
        }
        if shards == 0 {
            return Err(GeometryError {
                field: "shards",
                reason: "must be at least 1",
            });
        }
        Ok(Self {
            slots,
            shards,
            block_size,
            policy,
        })
    }

    #[must_use]
    pub fn slots(self) -> usize {
        self.slots
    }

    #[must_use]
    pub fn shards(self) -> usize {
        self.shards
    }

    #[must_use]
    pub fn block_size(self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn policy(self) -> EvictionPolicy {
        self.policy
    }
}

impl Default for CacheGeometry {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOT_COUNT,
            shards: DEFAULT_SHARD_COUNT,
            block_size: BlockSize::DEFAULT,
            policy: EvictionPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_accepts_powers_of_two_in_range() {
        for value in [1024_u32, 2048, 4096, 8192, 65536] {
            let bs = BlockSize::new(value).expect("valid block size");
            assert_eq!(bs.get(), value);
            assert_eq!(1_u32 << bs.shift(), value);
        }
    }

    #[test]
    fn block_size_rejects_invalid_values() {
        for value in [0_u32, 512, 1000, 4097, 131_072] {
            assert!(BlockSize::new(value).is_err(), "accepted {value}");
        }
    }

    #[test]
    fn block_to_byte_checks_overflow() {
        let bs = BlockSize::DEFAULT;
        assert_eq!(bs.block_to_byte(BlockNumber(3)), Some(3 * 4096));
        assert_eq!(bs.block_to_byte(BlockNumber(u64::MAX)), None);
    }

    #[test]
    fn mix_is_deterministic_and_separates_devices() {
        let a = BlockKey::new(DeviceId(1), BlockNumber(7));
        let b = BlockKey::new(DeviceId(2), BlockNumber(7));
        assert_eq!(a.mix(), a.mix());
        assert_ne!(a.mix(), b.mix());
    }

    #[test]
    fn geometry_rejects_zero_counts() {
        let bs = BlockSize::DEFAULT;
        assert!(CacheGeometry::new(0, 13, bs, EvictionPolicy::Recency).is_err());
        assert!(CacheGeometry::new(8, 0, bs, EvictionPolicy::Recency).is_err());
        let geo = CacheGeometry::new(8, 13, bs, EvictionPolicy::Bitmap).expect("valid");
        assert_eq!(geo.slots(), 8);
        assert_eq!(geo.policy(), EvictionPolicy::Bitmap);
    }

    #[test]
    fn default_geometry_is_valid() {
        let geo = CacheGeometry::default();
        assert_eq!(geo.slots(), DEFAULT_SLOT_COUNT);
        assert_eq!(geo.shards(), DEFAULT_SHARD_COUNT);
        assert_eq!(geo.block_size().get(), DEFAULT_BLOCK_SIZE);
        assert_eq!(geo.policy(), EvictionPolicy::Recency);
    }
}
