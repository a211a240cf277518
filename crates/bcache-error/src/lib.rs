#![forbid(unsafe_code)]
//! Error types for the bcache workspace.
//!
//! # Error Taxonomy
//!
//! Two layers:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Construction | `GeometryError` | `bcache-types` | Invalid geometry knobs caught before the cache exists |
//! | Runtime | `CacheError` | `bcache-error` (this crate) | Device and configuration faults surfaced to callers |
//!
//! `bcache-error` is intentionally independent of `bcache-types` to avoid
//! cyclic dependencies; `GeometryError` converts into [`CacheError::Geometry`]
//! in the `bcache` crate, which depends on both.
//!
//! # What is NOT an error
//!
//! Invariant violations inside the cache core are fatal and panic rather
//! than surface here: pool exhaustion on a miss, refcount underflow, and
//! release or unpin of a non-resident block. There is no
//! transient/retryable class in the core; everything recoverable is a
//! device-layer `Result`.

use thiserror::Error;

/// Unified runtime error for bcache operations.
///
/// All string payloads are owned so errors can cross thread boundaries
/// without lifetime entanglement.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device or cache geometry is structurally invalid.
    #[error("invalid geometry: {0}")]
    Geometry(String),

    /// Block number is beyond the end of the device.
    #[error("block out of range: block={block} block_count={count}")]
    OutOfRange { block: u64, count: u64 },

    /// A transfer was requested for a device this backend does not serve.
    #[error("device mismatch: want device {want}, got request for {got}")]
    DeviceMismatch { want: u32, got: u32 },

    /// Transfer buffer length does not match the device block size.
    #[error("buffer size mismatch: got={got} expected={expected}")]
    SizeMismatch { got: usize, expected: usize },

    /// Write attempted on a device opened read-only.
    #[error("read-only device")]
    ReadOnly,
}

/// Result alias using `CacheError`.
pub type Result<T> = std::result::Result<T, CacheError>;
