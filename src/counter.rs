use std::cell::Cell;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

/// Keeps each shard on its own cache line so that threads updating different shards do not
/// contend on the line.
#[derive(Debug, Default)]
#[repr(align(64))]
struct Shard(AtomicIsize);

static NEXT_SEED: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Which shard this thread tries first. Moved elsewhere whenever the thread collides.
    static SHARD_HASH: Cell<usize> = Cell::new(
        NEXT_SEED.fetch_add(1, Ordering::Relaxed).wrapping_mul(0x9e37_79b9)
    );
}

/// A counter that many threads can update at once without all of them fighting over one
/// atomic.
///
/// An update first tries the shared base cell. If that CAS fails, some other thread is
/// updating it too, and the update goes to one of the shards instead, picked by a per-thread
/// hash that moves on every collision. Reading the counter sums the base and every shard, so
/// a read racing with updates may miss some of them, but once writers stop the sum is exact.
#[derive(Debug)]
pub(crate) struct ConcurrentCounter {
    base: AtomicIsize,
    shards: Box<[Shard]>,
}

impl ConcurrentCounter {
    pub(crate) fn new() -> Self {
        let shards = crate::num_cpus().max(1).next_power_of_two();
        Self {
            base: AtomicIsize::new(0),
            shards: (0..shards).map(|_| Shard::default()).collect(),
        }
    }

    pub(crate) fn add(&self, value: isize) {
        let base = self.base.load(Ordering::Relaxed);
        if self
            .base
            .compare_exchange(base, base + value, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }

        let mask = self.shards.len() - 1;
        SHARD_HASH.with(|slot| {
            let mut h = slot.get();
            // a handful of rounds is plenty; after that, just wait our turn on the base
            for _ in 0..self.shards.len().max(4) {
                let shard = &self.shards[h & mask].0;
                let current = shard.load(Ordering::Relaxed);
                if shard
                    .compare_exchange(
                        current,
                        current + value,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    slot.set(h);
                    return;
                }
                h = rehash(h);
            }
            slot.set(h);
            self.base.fetch_add(value, Ordering::AcqRel);
        });
    }

    pub(crate) fn sum(&self) -> isize {
        let shards: isize = self.shards.iter().map(|s| s.0.load(Ordering::Acquire)).sum();
        self.base.load(Ordering::Acquire) + shards
    }
}

/// Marsaglia xorshift, for moving a thread's shard hash after a collision.
#[inline]
fn rehash(mut h: usize) -> usize {
    h ^= h << 13;
    h ^= h >> 7;
    h ^= h << 17;
    h
}
