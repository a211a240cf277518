#![forbid(unsafe_code)]

use bcache::{
    BlockDevice, BlockKey, BlockNumber, BlockSize, BufCache, CacheGeometry, DeviceId,
    EvictionPolicy, Result,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parking_lot::Mutex;
use std::collections::HashMap;

const DEV: DeviceId = DeviceId(1);

// ── In-memory device for benchmarks (no file I/O) ──────────────────────

#[derive(Debug, Default)]
struct MemDevice {
    blocks: Mutex<HashMap<BlockKey, Vec<u8>>>,
}

impl BlockDevice for MemDevice {
    fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> Result<()> {
        match self.blocks.lock().get(&key) {
            Some(bytes) => buf.copy_from_slice(bytes),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&self, key: BlockKey, buf: &[u8]) -> Result<()> {
        self.blocks.lock().insert(key, buf.to_vec());
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

fn make_cache(slots: usize, policy: EvictionPolicy) -> BufCache<MemDevice> {
    let geometry = CacheGeometry::new(
        slots,
        13,
        BlockSize::new(4096).expect("block size"),
        policy,
    )
    .expect("geometry");
    BufCache::new(MemDevice::default(), geometry)
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_resident_hit(c: &mut Criterion) {
    let cache = make_cache(8, EvictionPolicy::Recency);

    // Keep block 0 resident with a pin, then benchmark repeated hits.
    let guard = cache.acquire(DEV, BlockNumber(0));
    let pinned = guard.pin();
    guard.release();

    c.bench_function("bcache_hit_4k", |b| {
        b.iter(|| {
            let mut guard = cache.acquire(black_box(DEV), black_box(BlockNumber(0)));
            let _bytes = guard.load().expect("hit");
        });
    });

    cache.unpin(pinned);
}

fn bench_eviction_cycle(c: &mut Criterion) {
    // One slot: every distinct block evicts the previous one.
    let cache = make_cache(1, EvictionPolicy::Recency);

    let mut block_id = 0_u64;
    c.bench_function("bcache_evict_4k", |b| {
        b.iter(|| {
            let mut guard = cache.acquire(DEV, BlockNumber(block_id % 256));
            let _bytes = guard.load().expect("read");
            block_id += 1;
        });
    });
}

fn bench_mixed_working_set(c: &mut Criterion) {
    // 8-slot pool with a 16-block working set → ~50% stale rescues.
    let cache = make_cache(8, EvictionPolicy::Bitmap);

    for i in 0..16_u64 {
        let mut guard = cache.acquire(DEV, BlockNumber(i));
        let _ = guard.load().expect("warmup");
    }

    let mut iter = 0_u64;
    c.bench_function("bcache_mixed_4k", |b| {
        b.iter(|| {
            let mut guard = cache.acquire(DEV, black_box(BlockNumber(iter % 16)));
            let _bytes = guard.load().expect("read");
            iter += 1;
        });
    });
}

fn bench_counters_snapshot(c: &mut Criterion) {
    let cache = make_cache(8, EvictionPolicy::Recency);

    for i in 0..16_u64 {
        let mut guard = cache.acquire(DEV, BlockNumber(i));
        let _ = guard.load().expect("warmup");
    }

    c.bench_function("bcache_counters_snapshot", |b| {
        b.iter(|| {
            let _snap = cache.counters();
        });
    });
}

criterion_group!(
    cache_benches,
    bench_resident_hit,
    bench_eviction_cycle,
    bench_mixed_working_set,
    bench_counters_snapshot,
);
criterion_main!(cache_benches);
