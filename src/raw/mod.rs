mod resize;

pub(crate) use resize::{stride, Phase, ResizeState};

use crate::lock::LockStripe;
use crate::node::{self, BinEntry, Chain, Node};
use crate::reclaim::{Atomic, Collector, Guard, Linked, Shared};
use crate::Error;
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::Ordering;

/// One generation of a [`HashMap`](crate::HashMap)'s bins.
pub(crate) struct Table<K, V> {
    bins: Box<[Atomic<BinEntry<K, V>>]>,

    // a Moved carries no information of its own, so every transferred bin of this table
    // points at this one instance
    moved: Atomic<BinEntry<K, V>>,

    // the table this one's bins are being moved to
    //
    // safety: a `Moved` is only stored into a bin after `next_table` has been set, and a table
    // is only retired once every bin of it is `Moved` and the map points at its next table.
    // that next table is in turn only retired after the map has moved on from it. so anyone
    // who loaded _this_ table under a guard can follow `next_table` (and the next table's
    // `next_table`, and so on) for as long as that guard lives.
    next_table: Atomic<Table<K, V>>,

    /// The number of entries above which this table should be replaced by a larger one.
    pub(crate) threshold: usize,

    pub(crate) locks: LockStripe,
    pub(crate) resize: ResizeState,
}

impl<K, V> Table<K, V> {
    pub(crate) fn new(bins: usize, threshold: usize, fair: bool, collector: &Collector) -> Self {
        debug_assert!(bins.is_power_of_two());
        Self::from_parts(
            (0..bins).map(|_| Atomic::null()).collect(),
            LockStripe::new(bins, fair),
            threshold,
            collector,
        )
    }

    /// Allocates a table of `bins` empty bins and their locks, reporting allocation failure
    /// instead of aborting.
    pub(crate) fn try_new(
        bins: usize,
        threshold: usize,
        fair: bool,
        collector: &Collector,
    ) -> Result<Self, Error> {
        debug_assert!(bins.is_power_of_two());
        let mut v = Vec::new();
        v.try_reserve_exact(bins)
            .map_err(|_| Error::CapacityExhausted { requested: bins })?;
        v.extend((0..bins).map(|_| Atomic::null()));
        let locks = LockStripe::try_new(bins, fair)?;
        Ok(Self::from_parts(v.into_boxed_slice(), locks, threshold, collector))
    }

    fn from_parts(
        bins: Box<[Atomic<BinEntry<K, V>>]>,
        locks: LockStripe,
        threshold: usize,
        collector: &Collector,
    ) -> Self {
        debug_assert_eq!(bins.len(), locks.len());
        Self {
            locks,
            bins,
            moved: Atomic::from(Shared::boxed(BinEntry::Moved, collector)),
            next_table: Atomic::null(),
            threshold,
            resize: ResizeState::new(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.bins.len()
    }

    #[inline]
    pub(crate) fn bini(&self, hash: u64) -> usize {
        let mask = self.bins.len() as u64 - 1;
        (hash & mask) as usize
    }

    #[inline]
    pub(crate) fn bin<'g>(&'g self, i: usize, guard: &'g Guard<'_>) -> Shared<'g, BinEntry<K, V>> {
        self.bins[i].load(Ordering::Acquire, guard)
    }

    #[inline]
    pub(crate) fn cas_bin<'g>(
        &'g self,
        i: usize,
        current: Shared<'_, BinEntry<K, V>>,
        new: Shared<'g, BinEntry<K, V>>,
        guard: &'g Guard<'_>,
    ) -> Result<Shared<'g, BinEntry<K, V>>, Shared<'g, BinEntry<K, V>>> {
        self.bins[i].compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire, guard)
    }

    #[inline]
    pub(crate) fn store_bin(&self, i: usize, new: Shared<'_, BinEntry<K, V>>) {
        self.bins[i].store(new, Ordering::Release)
    }

    #[inline]
    pub(crate) fn moved<'g>(&'g self, guard: &'g Guard<'_>) -> Shared<'g, BinEntry<K, V>> {
        self.moved.load(Ordering::Acquire, guard)
    }

    #[inline]
    pub(crate) fn next_table<'g>(&'g self, guard: &'g Guard<'_>) -> Shared<'g, Table<K, V>> {
        self.next_table.load(Ordering::Acquire, guard)
    }

    /// Reads the next table without protecting it. Only for use when no other thread can reach
    /// `self`.
    pub(crate) fn next_table_unprotected(&self) -> *mut Linked<Table<K, V>> {
        self.next_table.load_unprotected()
    }

    /// Makes `next` the table this table's bins move to.
    pub(crate) fn set_next_table(&self, next: Shared<'_, Table<K, V>>) {
        self.next_table.store(next, Ordering::Release)
    }

    /// Looks up `key`, following forwarding markers into later tables.
    pub(crate) fn find<'g, Q>(
        &'g self,
        hash: u64,
        key: &Q,
        guard: &'g Guard<'_>,
    ) -> Option<&'g Node<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mut table = self;
        loop {
            let bin = table.bin(table.bini(hash), guard);
            // safety: bins loaded under `guard` are not freed before the guard is dropped.
            let bin = unsafe { bin.as_ref() }?;
            match **bin {
                BinEntry::Node(ref head) => {
                    return Chain::new(head, guard)
                        .find(|n| n.hash == hash && n.key.borrow() == key);
                }
                BinEntry::Tree(ref tree) => return tree.find(hash, key),
                BinEntry::Moved => {
                    // safety: see the comment on `next_table`.
                    table = unsafe { table.next_table(guard).deref() };
                }
            }
        }
    }

    /// Frees every entry still stored in this table, values included. Bins that were moved to
    /// the next table are left alone.
    ///
    /// # Safety
    ///
    /// No other thread may be able to reach this table.
    pub(crate) unsafe fn drop_bins(&self) {
        let moved = self.moved.load_unprotected();
        for bin in self.bins.iter() {
            let entry = bin.load_unprotected();
            if entry.is_null() || entry == moved {
                continue;
            }
            // safety: nobody else can reach the table, so we own everything in it.
            match **unsafe { &*entry } {
                BinEntry::Node(_) => unsafe { node::drop_chain(entry) },
                BinEntry::Tree(ref tree) => {
                    unsafe { tree.drop_values() };
                    drop(unsafe { Box::from_raw(entry) });
                }
                BinEntry::Moved => unreachable!("tables only hold their own Moved"),
            }
            bin.store(Shared::null(), Ordering::Relaxed);
        }
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        // the entries are either freed by `drop_bins` or now belong to the next table, so the
        // only thing left to free is the shared forwarding marker. the next table is not ours.
        let moved = self.moved.load_unprotected();
        assert!(
            !moved.is_null(),
            "self.moved is initialized together with the table"
        );
        // safety: we have &mut self, and bins pointing at `moved` are never dereferenced
        // again once the table is being dropped.
        drop(unsafe { Box::from_raw(moved) });
    }
}

impl<K, V> fmt::Debug for Table<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("bins", &self.bins.len())
            .field("threshold", &self.threshold)
            .field("resize", &self.resize)
            .finish()
    }
}
