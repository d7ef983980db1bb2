use std::ops::Range;
use std::sync::atomic::{AtomicIsize, AtomicU8, AtomicUsize, Ordering};

/// Minimum number of bins a helper claims at once when transferring a table.
pub(crate) const MIN_TRANSFER_STRIDE: usize = 16;

/// Where a table is in its one-time move to a larger table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Phase {
    /// No resize has been started.
    Idle = 0,
    /// The next table is being allocated or filled.
    Transferring = 1,
    /// Every bin has been moved and the next table has replaced this one.
    Done = 2,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Idle,
            1 => Phase::Transferring,
            2 => Phase::Done,
            _ => unreachable!("invalid resize phase {}", v),
        }
    }
}

/// The coordination state of moving one table's bins to its successor.
///
/// Bins are handed out from the top of the table down: `transfer_index` is the number of bins
/// not yet claimed by any helper, and a helper claims the range `[index - stride, index)` by
/// moving the index down. `helpers` counts the threads currently working on the transfer; the
/// one that brings it back to zero after all ranges are claimed checks that every bin really
/// has been moved (a helper may have stopped partway through its range) and completes the
/// resize.
///
/// Each table has its own `ResizeState`, and a table is resized at most once, so a stale
/// helper can never mistake a later resize for the one it joined.
#[derive(Debug)]
pub(crate) struct ResizeState {
    phase: AtomicU8,
    transfer_index: AtomicIsize,
    helpers: AtomicUsize,
}

impl ResizeState {
    pub(crate) fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Idle as u8),
            transfer_index: AtomicIsize::new(0),
            helpers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Moves from `Idle` to `Transferring`. Returns `true` if this thread gets to allocate the
    /// next table.
    pub(crate) fn try_begin(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Idle as u8,
                Phase::Transferring as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Gives up on a resize whose next table could not be allocated.
    pub(crate) fn abort(&self) {
        let prev = self.phase.swap(Phase::Idle as u8, Ordering::AcqRel);
        debug_assert_eq!(prev, Phase::Transferring as u8);
    }

    /// Makes the `bins` bins of the table available for claiming. Must happen before the next
    /// table is published.
    pub(crate) fn open(&self, bins: usize) {
        self.transfer_index.store(bins as isize, Ordering::Release);
    }

    /// Moves from `Transferring` to `Done`. Exactly one caller sees `true`, and that caller
    /// publishes the next table.
    pub(crate) fn try_finish(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Transferring as u8,
                Phase::Done as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns `true` if some bins have not been claimed by any helper yet.
    pub(crate) fn has_unclaimed(&self) -> bool {
        self.transfer_index.load(Ordering::Acquire) > 0
    }

    /// Returns the number of threads currently working on the transfer.
    pub(crate) fn helpers(&self) -> usize {
        self.helpers.load(Ordering::Acquire)
    }

    pub(crate) fn enter(&self) {
        self.helpers.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` if the caller was the last helper to leave.
    pub(crate) fn leave(&self) -> bool {
        self.helpers.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Claims the next range of at most `stride` bins.
    pub(crate) fn claim(&self, stride: usize) -> Option<Range<usize>> {
        let mut index = self.transfer_index.load(Ordering::Acquire);
        loop {
            if index <= 0 {
                return None;
            }
            let bound = index.saturating_sub(stride as isize).max(0);
            match self.transfer_index.compare_exchange_weak(
                index,
                bound,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(bound as usize..index as usize),
                Err(current) => index = current,
            }
        }
    }
}

/// How many bins a helper claims at once when moving a table of `n` bins.
pub(crate) fn stride(n: usize, ncpu: usize) -> usize {
    if ncpu > 1 {
        ((n >> 3) / ncpu).max(MIN_TRANSFER_STRIDE)
    } else {
        n
    }
}
