use crate::Error;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::fmt;
use std::time::{Duration, Instant};

/// A mutual-exclusion lock that the thread holding it may acquire again.
///
/// Acquisitions nest: the lock is released once every guard obtained by the owning thread has
/// been dropped. Besides blocking acquisition, the lock supports waiting for a bounded amount
/// of time ([`try_lock_for`](Self::try_lock_for)), which fails with [`Error::LockTimeout`]
/// instead of blocking indefinitely.
///
/// A _fair_ lock hands itself directly to the thread that has waited longest whenever it is
/// released. An unfair lock is simply released, and whichever thread gets to it first takes
/// it, which gives better throughput under contention.
///
/// # Examples
///
/// ```
/// use gust::ReentrantLock;
/// use std::time::Duration;
///
/// let lock = ReentrantLock::new(false);
/// let outer = lock.lock();
/// let inner = lock.try_lock_for(Duration::from_millis(10)).unwrap();
/// assert!(lock.is_locked());
/// drop(inner);
/// drop(outer);
/// assert!(!lock.is_locked());
/// ```
pub struct ReentrantLock {
    raw: ReentrantMutex<()>,
    fair: bool,
}

impl ReentrantLock {
    /// Creates an unlocked lock.
    pub fn new(fair: bool) -> Self {
        Self {
            raw: ReentrantMutex::new(()),
            fair,
        }
    }

    /// Returns `true` if this lock hands itself over to waiters in arrival order.
    pub fn is_fair(&self) -> bool {
        self.fair
    }

    /// Returns `true` if some thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Acquires the lock, blocking the current thread until it is available.
    pub fn lock(&self) -> ReentrantLockGuard<'_> {
        self.guard(self.raw.lock())
    }

    /// Acquires the lock if no other thread holds it.
    pub fn try_lock(&self) -> Option<ReentrantLockGuard<'_>> {
        self.raw.try_lock().map(|g| self.guard(g))
    }

    /// Acquires the lock, waiting at most `timeout` for it to become available.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<ReentrantLockGuard<'_>, Error> {
        self.raw
            .try_lock_for(timeout)
            .map(|g| self.guard(g))
            .ok_or(Error::LockTimeout { timeout })
    }

    /// Acquires the lock, waiting until `deadline` at the latest.
    ///
    /// `timeout` is only used to describe the failure if the deadline passes.
    pub(crate) fn try_lock_until(
        &self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<ReentrantLockGuard<'_>, Error> {
        self.raw
            .try_lock_until(deadline)
            .map(|g| self.guard(g))
            .ok_or(Error::LockTimeout { timeout })
    }

    fn guard<'a>(&self, inner: ReentrantMutexGuard<'a, ()>) -> ReentrantLockGuard<'a> {
        ReentrantLockGuard {
            inner: Some(inner),
            fair: self.fair,
        }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("fair", &self.fair)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Releases one acquisition of a [`ReentrantLock`] when dropped.
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReentrantLockGuard<'a> {
    inner: Option<ReentrantMutexGuard<'a, ()>>,
    fair: bool,
}

impl Drop for ReentrantLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if self.fair {
                ReentrantMutexGuard::unlock_fair(inner);
            }
        }
    }
}

impl fmt::Debug for ReentrantLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLockGuard")
            .field("fair", &self.fair)
            .finish()
    }
}

/// The bin locks of one table, one per bin, so writers to different bins never contend.
pub(crate) struct LockStripe {
    locks: Box<[ReentrantLock]>,
}

impl LockStripe {
    pub(crate) fn new(bins: usize, fair: bool) -> Self {
        Self {
            locks: (0..bins).map(|_| ReentrantLock::new(fair)).collect(),
        }
    }

    /// Allocates the locks for `bins` bins, reporting allocation failure instead of aborting.
    pub(crate) fn try_new(bins: usize, fair: bool) -> Result<Self, Error> {
        let mut locks = Vec::new();
        locks
            .try_reserve_exact(bins)
            .map_err(|_| Error::CapacityExhausted { requested: bins })?;
        locks.extend((0..bins).map(|_| ReentrantLock::new(fair)));
        Ok(Self {
            locks: locks.into_boxed_slice(),
        })
    }

    #[inline]
    pub(crate) fn lock_for(&self, bin: usize) -> &ReentrantLock {
        &self.locks[bin]
    }

    /// Locks bin `bin`, giving up at `deadline` if one is given.
    #[inline]
    pub(crate) fn acquire(
        &self,
        bin: usize,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<ReentrantLockGuard<'_>, Error> {
        let lock = self.lock_for(bin);
        match deadline {
            None => Ok(lock.lock()),
            Some((deadline, timeout)) => lock.try_lock_until(deadline, timeout),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

impl fmt::Debug for LockStripe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockStripe")
            .field("locks", &self.locks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;

    #[test]
    fn reentrant() {
        let lock = ReentrantLock::new(false);
        let a = lock.lock();
        let b = lock.lock();
        let c = lock.try_lock().expect("owner may re-acquire");
        drop(a);
        drop(b);
        assert!(lock.is_locked());
        drop(c);
        assert!(!lock.is_locked());
    }

    #[test]
    fn times_out_when_held_elsewhere() {
        let lock = Arc::new(ReentrantLock::new(false));
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _g = lock.lock();
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        };
        held_rx.recv().unwrap();

        let timeout = Duration::from_millis(20);
        assert_eq!(
            lock.try_lock_for(timeout).map(drop),
            Err(Error::LockTimeout { timeout })
        );
        assert!(lock.try_lock().is_none());

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(lock.try_lock_for(timeout).is_ok());
    }

    #[test]
    fn fair_lock_still_excludes() {
        let lock = Arc::new(ReentrantLock::new(true));
        let counter = Arc::new(parking_lot::Mutex::new(0usize));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _g = lock.lock();
                        let mut c = counter.try_lock().expect("lock provides exclusion");
                        *c += 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*counter.lock(), 4000);
        assert!(lock.is_fair());
    }

    #[test]
    fn one_lock_per_bin() {
        let stripe = LockStripe::new(16, false);
        assert_eq!(stripe.len(), 16);
        assert!(std::ptr::eq(stripe.lock_for(3), stripe.lock_for(3)));
        assert!(!std::ptr::eq(stripe.lock_for(3), stripe.lock_for(4)));

        let stripe = LockStripe::try_new(2048, true).unwrap();
        assert_eq!(stripe.len(), 2048);
        assert!(!std::ptr::eq(stripe.lock_for(1), stripe.lock_for(1025)));

        // holding one bin's lock leaves every other bin free
        let _held = stripe.lock_for(1).lock();
        let other = std::thread::scope(|s| {
            s.spawn(|| {
                let timeout = Duration::from_millis(10);
                (
                    stripe.acquire(1025, Some((Instant::now() + timeout, timeout))).is_ok(),
                    stripe.acquire(1, Some((Instant::now() + timeout, timeout))).is_ok(),
                )
            })
            .join()
            .unwrap()
        });
        assert_eq!(other, (true, false));
    }
}
