//! Slot store: the fixed arena of cache lines.
//!
//! Slots are allocated once at cache construction and addressed by stable
//! `u32` index for the lifetime of the cache. Each slot's payload and
//! validity flag are guarded by that slot's own content lock — an
//! exclusive, sleep-capable `parking_lot::Mutex`. Wakeup order among
//! content-lock waiters is unspecified; callers must not assume FIFO.
//!
//! Key and refcount do NOT live here: they are shard-directory state,
//! guarded by the owning shard's lock (see [`crate::shard`]).

use parking_lot::Mutex;

/// Payload and validity of one cache line. Guarded by the slot's content
/// lock only.
#[derive(Debug)]
pub(crate) struct SlotContent {
    /// Whether `payload` reflects on-disk content for the slot's current
    /// key. Cleared when a victim is re-keyed, set by a successful load.
    pub valid: bool,
    /// Exactly one block's worth of bytes.
    pub payload: Box<[u8]>,
}

/// One cache line.
#[derive(Debug)]
pub(crate) struct Slot {
    pub content: Mutex<SlotContent>,
}

impl Slot {
    pub fn new(block_size: usize) -> Self {
        Self {
            content: Mutex::new(SlotContent {
                valid: false,
                payload: vec![0_u8; block_size].into_boxed_slice(),
            }),
        }
    }
}

/// Build the arena. All slots start free and invalid.
pub(crate) fn arena(slots: usize, block_size: usize) -> Box<[Slot]> {
    (0..slots).map(|_| Slot::new(block_size)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_starts_invalid_with_sized_payloads() {
        let slots = arena(3, 1024);
        assert_eq!(slots.len(), 3);
        for slot in slots.iter() {
            let content = slot.content.lock();
            assert!(!content.valid);
            assert_eq!(content.payload.len(), 1024);
        }
    }

    #[test]
    fn content_lock_is_exclusive() {
        let slot = Slot::new(1024);
        let guard = slot.content.lock();
        assert!(slot.content.try_lock().is_none());
        drop(guard);
        assert!(slot.content.try_lock().is_some());
    }
}
