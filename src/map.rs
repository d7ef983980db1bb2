use crate::counter::ConcurrentCounter;
use crate::hash::hash_key;
use crate::iter::*;
use crate::node::{self, BinEntry, Node, TreeBin};
use crate::raw::{self, Phase, Table};
use crate::reclaim::{Atomic, Collector, Guard, Shared};
use crate::{Config, Error, MAXIMUM_CAPACITY, MIN_TREEIFY_CAPACITY, TREEIFY_THRESHOLD};
use crate::{UNTREEIFY_THRESHOLD, DEFAULT_CAPACITY};
use std::borrow::Borrow;
use std::fmt::{self, Debug, Formatter};
use std::hash::{BuildHasher, Hash};
use std::iter::FromIterator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A concurrent hash table.
///
/// Reads never block. Writes lock only the bin they modify, and when the table has to grow,
/// every writer that comes along helps move bins to the larger table.
///
/// The map uses [`Guard`]s to control the lifetime of the resources that get stored and
/// extracted from it. Guards are acquired through [`HashMap::guard`] and [`HashMap::pin`]. For
/// more information, see the [notes in the crate-level documentation].
///
/// [notes in the crate-level documentation]: index.html#a-note-on-guard-and-memory-use
pub struct HashMap<K, V, S = crate::DefaultHashBuilder> {
    /// The current array of bins. Size is always a power of two. Accessed directly by
    /// iterators.
    table: Atomic<Table<K, V>>,

    count: ConcurrentCounter,

    /// Hands out the insertion order used to break ties in tree bins.
    seq: AtomicU64,

    config: Config,

    /// Collector that all `Guard` references used for operations on this map must be tied to.
    /// Guards from some other collector would not keep this map's garbage alive, so every
    /// operation checks that it was given one of ours.
    collector: Collector,

    build_hasher: S,
}

// the map owns its keys and values, and hands out references to them to any thread that
// holds a guard. keys and values may also be dropped by whichever thread reclaims them.
unsafe impl<K, V, S> Send for HashMap<K, V, S>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Send,
{
}

unsafe impl<K, V, S> Sync for HashMap<K, V, S>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Sync,
{
}

impl<K, V> HashMap<K, V, crate::DefaultHashBuilder> {
    /// Creates a new, empty map with the default initial table size (16).
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::new();
    /// assert_eq!(map.capacity(&map.guard()), 16);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, empty map with an initial table size accommodating the specified number
    /// of elements without the need to dynamically resize.
    ///
    /// Capacities above [`MAXIMUM_CAPACITY`] are clamped to it.
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::with_capacity(100);
    /// assert!(map.capacity(&map.guard()) as f32 * 0.75 >= 100.0);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, crate::DefaultHashBuilder::default())
    }

    /// Creates a new, empty map with `capacity` bins and the given load factor.
    ///
    /// Returns [`Error::Validation`] if the parameters are out of range, and
    /// [`Error::CapacityExhausted`] if the table cannot be allocated.
    ///
    /// ```
    /// use gust::{Error, HashMap};
    ///
    /// let map: HashMap<u8, u8> = HashMap::with_capacity_and_load_factor(64, 0.5).unwrap();
    /// assert_eq!(map.capacity(&map.guard()), 64);
    ///
    /// assert!(matches!(
    ///     HashMap::<u8, u8>::with_capacity_and_load_factor(64, -1.0),
    ///     Err(Error::Validation(_))
    /// ));
    /// ```
    pub fn with_capacity_and_load_factor(capacity: usize, load_factor: f32) -> Result<Self, Error> {
        Self::with_config(
            Config::default()
                .initial_capacity(capacity)
                .load_factor(load_factor),
        )
    }

    /// Creates a new, empty map as described by `config`.
    pub fn with_config(config: Config) -> Result<Self, Error> {
        Self::with_config_and_hasher(config, crate::DefaultHashBuilder::default())
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates an empty map which will use `hash_builder` to hash keys.
    ///
    /// The created map has the default initial capacity.
    ///
    /// Warning: `hash_builder` is normally randomly generated, and is designed to allow the map
    /// to be resistant to attacks that cause many collisions and very poor performance. Setting
    /// it manually using this function can expose a DoS attack vector.
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::{HashMap, DefaultHashBuilder};
    ///
    /// let map = HashMap::with_hasher(DefaultHashBuilder::default());
    /// map.pin().insert(1, 2);
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(DEFAULT_CAPACITY, hash_builder)
    }

    /// Creates an empty map with the specified `capacity`, using `hash_builder` to hash the
    /// keys.
    ///
    /// The map will be sized to accommodate `capacity` elements with a low chance of
    /// reallocating (assuming uniformly distributed hashes). Capacities above
    /// [`MAXIMUM_CAPACITY`] are clamped to it.
    ///
    /// Warning: `hash_builder` is normally randomly generated, and is designed to allow the map
    /// to be resistant to attacks that cause many collisions and very poor performance. Setting
    /// it manually using this function can expose a DoS attack vector.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let config = Config::default();
        let bins = config.table_size_for(capacity.min(MAXIMUM_CAPACITY));
        let collector = Collector::new();
        let table = Table::new(bins, config.threshold(bins), config.fair_locks, &collector);
        Self::from_parts(table, config, collector, hash_builder)
    }

    /// Creates an empty map as described by `config`, using `hash_builder` to hash the keys.
    ///
    /// `config.initial_capacity` is the number of bins to start with, rounded up to a power of
    /// two.
    pub fn with_config_and_hasher(config: Config, hash_builder: S) -> Result<Self, Error> {
        config.validate()?;
        let bins = config.table_size();
        let collector = Collector::new();
        let table = Table::try_new(bins, config.threshold(bins), config.fair_locks, &collector)?;
        Ok(Self::from_parts(table, config, collector, hash_builder))
    }

    fn from_parts(table: Table<K, V>, config: Config, collector: Collector, build_hasher: S) -> Self {
        log::trace!("creating map with {} bins", table.len());
        Self {
            table: Atomic::from(Shared::boxed(table, &collector)),
            count: ConcurrentCounter::new(),
            seq: AtomicU64::new(0),
            config,
            collector,
            build_hasher,
        }
    }

    /// Pin a `Guard` for use with this map.
    ///
    /// Keep in mind that for as long as you hold onto this `Guard`, you are preventing the
    /// collection of garbage generated by the map.
    pub fn guard(&self) -> Guard<'_> {
        self.collector.enter()
    }

    #[inline]
    pub(crate) fn check_guard(&self, guard: &Guard<'_>) {
        // guard.collector() may be `None` if it is unprotected
        if let Some(c) = guard.collector() {
            assert!(
                Collector::ptr_eq(c, &self.collector),
                "guard belongs to a different collector than this map"
            );
        }
    }

    /// Returns the number of entries in the map.
    ///
    /// The count is kept in per-CPU cells, so while writers are active this may lag behind
    /// their changes. Once they stop, it is exact.
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map = HashMap::new();
    ///
    /// map.pin().insert(1, "a");
    /// map.pin().insert(2, "b");
    /// assert!(map.pin().len() == 2);
    /// ```
    pub fn len(&self) -> usize {
        let n = self.count.sum();
        if n < 0 {
            0
        } else {
            n as usize
        }
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map = HashMap::new();
    /// assert!(map.pin().is_empty());
    /// map.pin().insert("a", 1);
    /// assert!(!map.pin().is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of bins in the current table.
    pub fn capacity(&self, guard: &Guard<'_>) -> usize {
        self.check_guard(guard);
        self.current(guard).len()
    }

    /// Returns the configuration this map was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    fn current<'g>(&'g self, guard: &'g Guard<'_>) -> &'g Table<K, V> {
        let table = self.table.load(Ordering::Acquire, guard);
        // safety: the table is never null, and is only retired after `self.table` has moved
        // on to its successor. since we loaded it under `guard`, it stays alive until `guard`
        // is dropped.
        unsafe { &**table.deref() }
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    ///
    /// The iterator is weakly consistent: it never fails, yields every entry present for the
    /// whole iteration exactly once, and may or may not reflect modifications made while it
    /// runs. The iterator element type is `(&'g K, &'g V)`.
    pub fn iter<'g>(&'g self, guard: &'g Guard<'_>) -> Iter<'g, K, V> {
        self.check_guard(guard);
        let table = self.table.load(Ordering::Acquire, guard);
        let node_iter = NodeIter::new(table, guard);
        Iter { node_iter, guard }
    }

    /// An iterator visiting all keys in arbitrary order.
    ///
    /// The iterator element type is `&'g K`.
    pub fn keys<'g>(&'g self, guard: &'g Guard<'_>) -> Keys<'g, K, V> {
        self.check_guard(guard);
        let table = self.table.load(Ordering::Acquire, guard);
        let node_iter = NodeIter::new(table, guard);
        Keys { node_iter }
    }

    /// An iterator visiting all values in arbitrary order.
    ///
    /// The iterator element type is `&'g V`.
    pub fn values<'g>(&'g self, guard: &'g Guard<'_>) -> Values<'g, K, V> {
        self.check_guard(guard);
        let table = self.table.load(Ordering::Acquire, guard);
        let node_iter = NodeIter::new(table, guard);
        Values { node_iter, guard }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

// ===
// the following methods only see Ks and Vs if there have been inserts.
// modifications to the map are all guarded by thread-safety bounds (Send + Sync + 'static).
// but _these_ methods do not need to be, since they will never introduce keys or values, only
// give out ones that have already been inserted (which implies they must be thread-safe).
// ===

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash<Q: ?Sized + Hash>(&self, key: &Q) -> u64 {
        hash_key(&self.build_hasher, key)
    }

    fn get_node<'g, Q>(&'g self, key: &Q, guard: &'g Guard<'_>) -> Option<&'g Node<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let h = self.hash(key);
        self.current(guard).find(h, key, guard)
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// The key may be any borrowed form of the map's key type, but [`Hash`] and [`Eq`] on the
    /// borrowed form *must* match those for the key type.
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map = HashMap::new();
    /// let mref = map.pin();
    /// mref.insert(1, "a");
    /// assert_eq!(mref.contains_key(&1), true);
    /// assert_eq!(mref.contains_key(&2), false);
    /// ```
    pub fn contains_key<Q>(&self, key: &Q, guard: &Guard<'_>) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.check_guard(guard);
        self.get_node(key, guard).is_some()
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the map's key type, but [`Hash`] and [`Eq`] on the
    /// borrowed form *must* match those for the key type.
    ///
    /// To obtain a `Guard`, use [`HashMap::guard`].
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map = HashMap::new();
    /// let mref = map.pin();
    /// mref.insert(1, "a");
    /// assert_eq!(mref.get(&1), Some(&"a"));
    /// assert_eq!(mref.get(&2), None);
    /// ```
    #[inline]
    pub fn get<'g, Q>(&'g self, key: &Q, guard: &'g Guard<'_>) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.check_guard(guard);
        let node = self.get_node(key, guard)?;
        let v = node.value.load(Ordering::Acquire, guard);
        // safety: a value is only freed once it has been swapped out of its node and no guard
        // that could have loaded it remains. we loaded it under `guard`.
        unsafe { v.as_ref() }.map(|v| &**v)
    }

    /// Returns the key-value pair corresponding to `key`.
    ///
    /// Returns `None` if this map contains no mapping for `key`.
    ///
    /// The supplied key may be any borrowed form of the map's key type, but [`Hash`] and [`Eq`]
    /// on the borrowed form must match those for the key type.
    #[inline]
    pub fn get_key_value<'g, Q>(&'g self, key: &Q, guard: &'g Guard<'_>) -> Option<(&'g K, &'g V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.check_guard(guard);
        let node = self.get_node(key, guard)?;
        let v = node.value.load(Ordering::Acquire, guard);
        // safety: see `get`
        unsafe { v.as_ref() }.map(|v| (&node.key, &**v))
    }

    pub(crate) fn guarded_eq(
        &self,
        other: &Self,
        our_guard: &Guard<'_>,
        their_guard: &Guard<'_>,
    ) -> bool
    where
        V: PartialEq,
    {
        if self.len() != other.len() {
            return false;
        }

        self.iter(our_guard)
            .all(|(key, value)| other.get(key, their_guard).map_or(false, |v| *value == *v))
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: 'static + Sync + Send + Clone + Hash + Eq,
    V: 'static + Sync + Send,
    S: BuildHasher,
{
    /// Inserts a key-value pair into the map.
    ///
    /// If the map did not have this key present, [`None`] is returned.
    ///
    /// If the map did have this key present, the value is updated, and the old value is
    /// returned. The key is left unchanged. The old value stays valid for as long as `guard`
    /// lives.
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map = HashMap::new();
    /// assert_eq!(map.pin().insert(37, "a"), None);
    /// assert_eq!(map.pin().is_empty(), false);
    ///
    /// // you can also re-use a map pin like so:
    /// let mref = map.pin();
    ///
    /// mref.insert(37, "b");
    /// assert_eq!(mref.insert(37, "c"), Some(&"b"));
    /// assert_eq!(mref.get(&37), Some(&"c"));
    /// ```
    pub fn insert<'g>(&'g self, key: K, value: V, guard: &'g Guard<'_>) -> Option<&'g V> {
        self.check_guard(guard);
        match self.put(key, value, None, guard) {
            Ok(old) => old,
            Err(_) => unreachable!("put without a deadline never times out"),
        }
    }

    /// Inserts a key-value pair into the map, waiting at most `timeout` for the bin's lock.
    ///
    /// Inserting into an empty bin never waits. If the lock could not be acquired in time,
    /// [`Error::LockTimeout`] is returned and the map is left unchanged.
    ///
    /// ```
    /// use gust::HashMap;
    /// use std::time::Duration;
    ///
    /// let map = HashMap::new();
    /// let guard = map.guard();
    /// assert_eq!(map.try_insert_for(1, "a", Duration::from_millis(10), &guard), Ok(None));
    /// assert_eq!(map.try_insert_for(1, "b", Duration::from_millis(10), &guard), Ok(Some(&"a")));
    /// ```
    pub fn try_insert_for<'g>(
        &'g self,
        key: K,
        value: V,
        timeout: Duration,
        guard: &'g Guard<'_>,
    ) -> Result<Option<&'g V>, Error> {
        self.check_guard(guard);
        let deadline = Instant::now() + timeout;
        self.put(key, value, Some((deadline, timeout)), guard)
    }

    fn put<'g>(
        &'g self,
        mut key: K,
        value: V,
        deadline: Option<(Instant, Duration)>,
        guard: &'g Guard<'_>,
    ) -> Result<Option<&'g V>, Error> {
        let hash = self.hash(&key);
        let mut value = Shared::boxed(value, &self.collector);
        let mut table = self.table.load(Ordering::Acquire, guard);
        loop {
            // safety: table is a valid pointer.
            //
            // we are in one of two cases:
            //
            //  1. if table is the one we read before the loop, then we read it while holding
            //     the guard, so it won't be freed until after we drop that guard, since a table
            //     is only retired after the map stops pointing to it.
            //
            //  2. if table was reached by following a Moved entry (below) through
            //     help_transfer, see the safety comment on Table.next_table.
            let t = unsafe { table.deref() };

            let bini = t.bini(hash);
            let mut bin = t.bin(bini, guard);
            if bin.is_null() {
                // fast path -- bin is empty so stick us at the front
                let node = Shared::boxed(
                    BinEntry::Node(Node::new(hash, self.next_seq(), key, value)),
                    &self.collector,
                );
                match t.cas_bin(bini, bin, node, guard) {
                    Ok(_) => {
                        self.add_count(1, deadline, guard);
                        guard.flush();
                        return Ok(None);
                    }
                    Err(current) => {
                        bin = current;
                        // safety: the node was never published, so we still own it.
                        let linked = *unsafe { node.into_box() };
                        let node = match linked.value {
                            BinEntry::Node(node) => node,
                            _ => unreachable!("we declared node and it is a BinEntry::Node"),
                        };
                        value = Shared::from(node.value.load_unprotected());
                        key = node.key;
                    }
                }
            }

            // slow path -- bin is non-empty

            // safety: bin is a valid pointer.
            //
            // a bin is replaced when the table is resized (by Moved), when it is turned into or
            // out of a tree, or when its tree is rebuilt. in all cases the old bin is retired
            // after the swap, and we read it under our guard, so it is not freed before we
            // drop that guard.
            if let BinEntry::Moved = **unsafe { bin.deref() } {
                table = self.help_transfer(t, deadline, guard);
                continue;
            }

            // bin is non-empty, need to link into it, so we must take the lock
            let lock = match t.locks.acquire(bini, deadline) {
                Ok(lock) => lock,
                Err(e) => {
                    // safety: the value was never published, so we still own it.
                    drop(unsafe { value.into_box() });
                    return Err(e);
                }
            };

            // need to check that this is _still_ the head
            if t.bin(bini, guard) != bin {
                // nope -- try again from the start
                continue;
            }

            // yes, it is still the head, so we can now "own" the bin
            // note that there can still be readers in the bin!
            let mut grow = false;
            let old = match **unsafe { bin.deref() } {
                BinEntry::Node(ref head) => {
                    let mut n = head;
                    let mut len = 1;
                    loop {
                        if n.hash == hash && n.key == key {
                            // the key already exists in the map!
                            break Some(self.replace_value(n, value, guard));
                        }

                        let next = n.next.load(Ordering::Acquire, guard);
                        if next.is_null() {
                            // we're at the end of the bin -- stick the node here!
                            let node = Shared::boxed(
                                BinEntry::Node(Node::new(hash, self.next_seq(), key, value)),
                                &self.collector,
                            );
                            n.next.store(node, Ordering::Release);
                            len += 1;
                            if len > TREEIFY_THRESHOLD {
                                if t.len() < MIN_TREEIFY_CAPACITY {
                                    grow = true;
                                } else {
                                    self.treeify_bin(t, bini, guard);
                                }
                            }
                            break None;
                        }
                        n = node_of(next);
                        len += 1;
                    }
                }
                BinEntry::Tree(ref tree) => match tree.find(hash, &key) {
                    Some(n) => Some(self.replace_value(n, value, guard)),
                    None => {
                        let node = Node::new(hash, self.next_seq(), key, value);
                        let grown = tree.with(node);
                        t.store_bin(
                            bini,
                            Shared::boxed(BinEntry::Tree(grown), &self.collector),
                        );
                        // safety: the old tree is no longer reachable from the table. it shares
                        // its entries with the new tree, so retiring it frees only its own path.
                        unsafe { bin.retire(guard) };
                        None
                    }
                },
                BinEntry::Moved => unreachable!("the bin was not Moved before we locked it"),
            };
            drop(lock);

            if old.is_some() {
                return Ok(old);
            }
            if grow {
                // the bin is long because the table is small; make the table bigger instead.
                // errors have already been logged, and the entry is in the map either way.
                let _ = self.grow(self.current(guard), None, deadline, guard);
            }
            self.add_count(1, deadline, guard);
            guard.flush();
            return Ok(None);
        }
    }

    fn replace_value<'g>(
        &'g self,
        node: &'g Node<K, V>,
        value: Shared<'g, V>,
        guard: &'g Guard<'_>,
    ) -> &'g V {
        let now_garbage = node.value.swap(value, Ordering::AcqRel, guard);
        // safety: need to guarantee that now_garbage is no longer reachable. more
        // specifically, no thread that executes _after_ this line can ever get a reference to
        // now_garbage.
        //
        // here are the possible cases:
        //
        //  - another thread already has a reference to now_garbage. they must have read it
        //    under a guard before the call to swap, and now_garbage won't be freed until that
        //    guard is dropped.
        //  - another thread is about to get a reference to this value. they execute _after_
        //    the swap, and therefore do _not_ get a reference to now_garbage (they get `value`
        //    instead). copies of this node made by an earlier resize or tree rebuild still
        //    point at now_garbage, but those copies were retired when they were made
        //    unreachable, so only threads that already hold a guard can see them.
        unsafe { now_garbage.retire(guard) };
        // safety: retired values are not freed while `guard` is held
        unsafe { &**now_garbage.deref() }
    }

    fn put_all<I: Iterator<Item = (K, V)>>(&self, iter: I, guard: &Guard<'_>) {
        for (key, value) in iter {
            let _ = self.insert(key, value, guard);
        }
    }

    /// Removes a key from the map, returning a reference to the value at the key if the key
    /// was previously in the map.
    ///
    /// The key may be any borrowed form of the map's key type, but [`Hash`] and [`Eq`] on the
    /// borrowed form *must* match those for the key type.
    ///
    /// # Examples
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map = HashMap::new();
    /// map.pin().insert(1, "a");
    /// assert_eq!(map.pin().remove(&1), Some(&"a"));
    /// assert_eq!(map.pin().remove(&1), None);
    /// ```
    pub fn remove<'g, Q>(&'g self, key: &Q, guard: &'g Guard<'_>) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(key, guard).map(|(_, v)| v)
    }

    /// Removes a key from the map, returning the stored key and value if the key was previously
    /// in the map.
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map = HashMap::new();
    /// let guard = map.guard();
    /// map.insert(1, "a", &guard);
    /// assert_eq!(map.remove_entry(&1, &guard), Some((&1, &"a")));
    /// assert_eq!(map.remove(&1, &guard), None);
    /// ```
    pub fn remove_entry<'g, Q>(&'g self, key: &Q, guard: &'g Guard<'_>) -> Option<(&'g K, &'g V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.check_guard(guard);
        match self.remove_node(key, None, guard) {
            Ok(removed) => removed,
            Err(_) => unreachable!("remove without a deadline never times out"),
        }
    }

    /// Removes a key from the map, waiting at most `timeout` for the bin's lock.
    ///
    /// If the lock could not be acquired in time, [`Error::LockTimeout`] is returned and the
    /// map is left unchanged.
    pub fn try_remove_for<'g, Q>(
        &'g self,
        key: &Q,
        timeout: Duration,
        guard: &'g Guard<'_>,
    ) -> Result<Option<&'g V>, Error>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.check_guard(guard);
        let deadline = Instant::now() + timeout;
        Ok(self
            .remove_node(key, Some((deadline, timeout)), guard)?
            .map(|(_, v)| v))
    }

    fn remove_node<'g, Q>(
        &'g self,
        key: &Q,
        deadline: Option<(Instant, Duration)>,
        guard: &'g Guard<'_>,
    ) -> Result<Option<(&'g K, &'g V)>, Error>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hash(key);
        let mut table = self.table.load(Ordering::Acquire, guard);
        loop {
            // safety: see `put`
            let t = unsafe { table.deref() };
            let bini = t.bini(hash);
            let bin = t.bin(bini, guard);
            if bin.is_null() {
                return Ok(None);
            }

            // safety: see `put`
            if let BinEntry::Moved = **unsafe { bin.deref() } {
                table = self.help_transfer(t, deadline, guard);
                continue;
            }

            let lock = t.locks.acquire(bini, deadline)?;
            if t.bin(bini, guard) != bin {
                continue;
            }

            let removed = match **unsafe { bin.deref() } {
                BinEntry::Node(_) => {
                    let mut pred: Option<&'g Node<K, V>> = None;
                    let mut p = bin;
                    loop {
                        let n = node_of(p);
                        let next = n.next.load(Ordering::Acquire, guard);
                        if n.hash == hash && n.key.borrow() == key {
                            match pred {
                                Some(pred) => pred.next.store(next, Ordering::Release),
                                None => t.store_bin(bini, next),
                            }
                            let value = n.value.load(Ordering::Acquire, guard);
                            // safety: the node is unlinked, so it and its value can no longer
                            // be reached by threads that start looking after this point.
                            unsafe {
                                value.retire(guard);
                                p.retire(guard);
                            }
                            // safety: retired values are not freed while `guard` is held
                            break Some((&n.key, unsafe { &**value.deref() }));
                        }
                        if next.is_null() {
                            break None;
                        }
                        pred = Some(n);
                        p = next;
                    }
                }
                BinEntry::Tree(ref tree) => match tree.find(hash, key) {
                    None => None,
                    Some(n) => {
                        let value = n.value.load(Ordering::Acquire, guard);
                        let rest = tree.without(n);
                        let replacement = if rest.len() < UNTREEIFY_THRESHOLD {
                            log::trace!("untreeifying bin {} with {} entries", bini, rest.len());
                            let nodes = rest.iter().map(|n| n.duplicate(guard)).collect();
                            node::link_chain(nodes, &self.collector)
                        } else {
                            Shared::boxed(BinEntry::Tree(rest), &self.collector)
                        };
                        t.store_bin(bini, replacement);
                        // safety: the old tree and the removed value are unreachable for
                        // anyone who looks at the bin from now on.
                        unsafe {
                            value.retire(guard);
                            bin.retire(guard);
                        }
                        // safety: retired values are not freed while `guard` is held
                        Some((&n.key, unsafe { &**value.deref() }))
                    }
                },
                BinEntry::Moved => unreachable!("the bin was not Moved before we locked it"),
            };
            drop(lock);

            if removed.is_some() {
                self.add_count(-1, deadline, guard);
                guard.flush();
            }
            return Ok(removed);
        }
    }

    /// Replaces the list bin at `index` with a tree bin holding the same entries, unless it is
    /// already short enough.
    ///
    /// May be called while the caller holds the bin's lock.
    fn treeify_bin<'g>(&'g self, tab: &'g Table<K, V>, index: usize, guard: &'g Guard<'_>) {
        let _lock = tab.locks.lock_for(index).lock();
        let bin = tab.bin(index, guard);
        // safety: see `put`
        let head = match unsafe { bin.as_ref() }.map(|b| &**b) {
            Some(BinEntry::Node(head)) => head,
            _ => return,
        };
        let nodes: Vec<_> = node::Chain::new(head, guard)
            .map(|n| n.duplicate(guard))
            .collect();
        if nodes.len() <= TREEIFY_THRESHOLD {
            return;
        }
        log::trace!("treeifying bin {} with {} entries", index, nodes.len());
        tab.store_bin(
            index,
            Shared::boxed(BinEntry::Tree(TreeBin::new(nodes)), &self.collector),
        );
        // safety: the chain is no longer reachable from the table. its values now belong to
        // the tree.
        unsafe { retire_chain(bin, bin_end(), guard) };
    }

    /// Builds the bin that holds `nodes`, which are in tree order: a list if there are only a
    /// few, a tree otherwise.
    fn bin_of<'g>(
        &self,
        nodes: &[Arc<Node<K, V>>],
        guard: &Guard<'_>,
    ) -> Shared<'g, BinEntry<K, V>> {
        if nodes.is_empty() {
            Shared::null()
        } else if nodes.len() <= UNTREEIFY_THRESHOLD {
            let nodes = nodes.iter().map(|n| n.duplicate(guard)).collect();
            node::link_chain(nodes, &self.collector)
        } else {
            Shared::boxed(BinEntry::Tree(TreeBin::from_sorted(nodes)), &self.collector)
        }
    }

    /// Adds `n` to the entry count, and grows the table if it is now too full.
    ///
    /// Helping with the resize stops at `deadline`; the resize is then left for others.
    fn add_count(&self, n: isize, deadline: Option<(Instant, Duration)>, guard: &Guard<'_>) {
        self.count.add(n);
        if n <= 0 {
            return;
        }

        loop {
            let t = self.current(guard);
            let count = self.count.sum();
            if count <= 0 || count as usize <= t.threshold {
                break;
            }
            match self.grow(t, None, deadline, guard) {
                Ok(true) => continue,
                Ok(false) | Err(_) => break,
            }
        }
    }

    /// Helps move the bins of `table` to a table twice its size, starting the move if nobody
    /// has yet.
    ///
    /// Returns `Ok(true)` if this call published the successor of `table`, or found it already
    /// published, and `Ok(false)` otherwise: other helpers may be busy or about to publish,
    /// `budget` may have run out, or a bin lock could not be had by `deadline`. If the larger
    /// table cannot be allocated, `table` stays as it was.
    fn grow<'g>(
        &'g self,
        table: &'g Table<K, V>,
        budget: Option<usize>,
        deadline: Option<(Instant, Duration)>,
        guard: &'g Guard<'_>,
    ) -> Result<bool, Error> {
        let state = &table.resize;
        match state.phase() {
            Phase::Idle => {
                let n = table.len();
                if n >= MAXIMUM_CAPACITY || !state.try_begin() {
                    return Ok(false);
                }
                let nt = match Table::try_new(
                    n << 1,
                    self.config.threshold(n << 1),
                    self.config.fair_locks,
                    &self.collector,
                ) {
                    Ok(nt) => nt,
                    Err(e) => {
                        state.abort();
                        log::warn!("could not grow table beyond {} bins: {}", n, e);
                        return Err(e);
                    }
                };
                log::debug!("resizing table from {} to {} bins", n, n << 1);
                let next = Shared::boxed(nt, &self.collector);
                state.open(n);
                table.set_next_table(next);
                Ok(self.transfer(table, next, budget, deadline, guard))
            }
            Phase::Transferring => {
                let next = table.next_table(guard);
                if next.is_null() {
                    // the next table is still being allocated
                    return Ok(false);
                }
                if !state.has_unclaimed() && state.helpers() > 0 {
                    // nothing left to claim, and someone is still working on the rest
                    return Ok(false);
                }
                Ok(self.transfer(table, next, budget, deadline, guard))
            }
            Phase::Done => Ok(true),
        }
    }

    /// Called by writers that found a Moved bin in `table`. Helps the resize along if there is
    /// work left, and returns the table the bin moved to.
    ///
    /// A writer with a `deadline` stops helping once a bin lock cannot be had in time. It still
    /// gets the next table back, and tries its own bin there with whatever time is left.
    fn help_transfer<'g>(
        &'g self,
        table: &'g Table<K, V>,
        deadline: Option<(Instant, Duration)>,
        guard: &'g Guard<'_>,
    ) -> Shared<'g, Table<K, V>> {
        let next = table.next_table(guard);
        debug_assert!(!next.is_null(), "bins are only Moved once the next table is set");
        let state = &table.resize;
        if state.phase() == Phase::Transferring && (state.has_unclaimed() || state.helpers() == 0)
        {
            self.transfer(table, next, None, deadline, guard);
        }
        next
    }

    /// Moves bins of `table` into `next` until there are no more to claim, until `budget`
    /// bins have been moved, or until a bin lock cannot be had by `deadline`.
    ///
    /// The helper that leaves last, once every range has been claimed, goes over the whole
    /// table to pick up bins that helpers who stopped early left behind, and then tries to
    /// publish `next`. Returns `true` only if this call published `next`. A helper that stops
    /// early leaves its remaining bins in place; whoever next finds no helpers at work picks
    /// them up.
    fn transfer<'g>(
        &'g self,
        table: &'g Table<K, V>,
        next: Shared<'g, Table<K, V>>,
        mut budget: Option<usize>,
        deadline: Option<(Instant, Duration)>,
        guard: &'g Guard<'_>,
    ) -> bool {
        // safety: `next` was loaded from `table.next_table`; see the comment there.
        let nt = unsafe { &**next.deref() };
        let n = table.len();
        let state = &table.resize;
        let stride = raw::stride(n, crate::num_cpus());

        state.enter();
        'claims: while budget != Some(0) {
            let range = match state.claim(stride) {
                Some(range) => range,
                None => break,
            };
            for i in range.rev() {
                if budget == Some(0) {
                    log::trace!("leaving transfer of {} bins early at bin {}", n, i);
                    break 'claims;
                }
                if let Err(e) = self.transfer_bin(table, nt, i, deadline, guard) {
                    log::trace!("leaving transfer of {} bins at bin {}: {}", n, i, e);
                    break 'claims;
                }
                if let Some(b) = budget.as_mut() {
                    *b -= 1;
                }
            }
        }
        if !state.leave() || state.has_unclaimed() {
            return false;
        }

        // we are the last one out, and every range has been handed out. some of them may not
        // have been finished, so check every bin.
        for i in 0..n {
            if budget == Some(0) {
                log::trace!("leaving final sweep of {} bins early at bin {}", n, i);
                return false;
            }
            match self.transfer_bin(table, nt, i, deadline, guard) {
                Ok(true) => {
                    if let Some(b) = budget.as_mut() {
                        *b -= 1;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    log::trace!("leaving final sweep of {} bins at bin {}: {}", n, i, e);
                    return false;
                }
            }
        }

        if !state.try_finish() {
            return false;
        }
        let old = self.table.swap(next, Ordering::AcqRel, guard);
        // safety: we loaded `table` under our guard, and only the helper that finishes its
        // transfer retires it, which is us.
        debug_assert!(std::ptr::eq(unsafe { &**old.deref() }, table));
        log::debug!("resized table to {} bins", nt.len());
        // safety: every bin of the old table is Moved, and the map now points to `next`.
        // threads that loaded the old table did so under a guard that keeps it alive.
        unsafe { old.retire(guard) };
        true
    }

    /// Moves bin `i` of `table` into bins `i` and `i + n` of `nt`. Returns `Ok(false)` if the
    /// bin had already been moved, and an error if its lock could not be had by `deadline`.
    fn transfer_bin<'g>(
        &'g self,
        table: &'g Table<K, V>,
        nt: &'g Table<K, V>,
        i: usize,
        deadline: Option<(Instant, Duration)>,
        guard: &'g Guard<'_>,
    ) -> Result<bool, Error> {
        let n = table.len();
        loop {
            let bin = table.bin(i, guard);
            if bin.is_null() {
                // nothing to move; just mark the bin as transferred
                if table.cas_bin(i, bin, table.moved(guard), guard).is_ok() {
                    return Ok(true);
                }
                continue;
            }

            let lock = table.locks.acquire(i, deadline)?;
            if table.bin(i, guard) != bin {
                continue;
            }

            // safety: see `put`
            match **unsafe { bin.deref() } {
                BinEntry::Moved => return Ok(false),
                BinEntry::Node(ref head) => {
                    // the tail of the chain whose entries all go to the same new bin can be
                    // reused as is. everything before it is copied.
                    let mut run_bit = head.hash & n as u64;
                    let mut last_run = bin;
                    let mut p = bin;
                    loop {
                        let node = node_of(p);
                        let b = node.hash & n as u64;
                        if b != run_bit {
                            run_bit = b;
                            last_run = p;
                        }
                        p = node.next.load(Ordering::Acquire, guard);
                        if p.is_null() {
                            break;
                        }
                    }

                    let (mut low, mut high) = if run_bit == 0 {
                        (last_run, Shared::null())
                    } else {
                        (Shared::null(), last_run)
                    };

                    p = bin;
                    while p != last_run {
                        let node = node_of(p);
                        let link = if node.hash & n as u64 == 0 {
                            &mut low
                        } else {
                            &mut high
                        };
                        *link = Shared::boxed(
                            BinEntry::Node(Node::with_next(
                                node.hash,
                                node.seq,
                                node.key.clone(),
                                node.value.load(Ordering::Acquire, guard),
                                Atomic::from(*link),
                            )),
                            &self.collector,
                        );
                        p = node.next.load(Ordering::Acquire, guard);
                    }

                    nt.store_bin(i, low);
                    nt.store_bin(i + n, high);
                    table.store_bin(i, table.moved(guard));

                    // safety: the copied nodes are no longer reachable from either table.
                    unsafe { retire_chain(bin, last_run, guard) };
                }
                BinEntry::Tree(ref tree) => {
                    let (low, high): (Vec<_>, Vec<_>) =
                        tree.iter().cloned().partition(|node| node.hash & n as u64 == 0);

                    nt.store_bin(i, self.bin_of(&low, guard));
                    nt.store_bin(i + n, self.bin_of(&high, guard));
                    table.store_bin(i, table.moved(guard));

                    // safety: the tree is no longer reachable from either table. its entries
                    // live on in the new bins, as shared entries or as copies.
                    unsafe { bin.retire(guard) };
                }
            }
            drop(lock);
            return Ok(true);
        }
    }

    /// Grows the table ahead of time so that `additional` more entries fit without another
    /// resize.
    ///
    /// Failure to allocate is logged and otherwise ignored. Use
    /// [`try_reserve`](Self::try_reserve) to observe it.
    pub fn reserve(&self, additional: usize, guard: &Guard<'_>) {
        if let Err(e) = self.try_reserve(additional, guard) {
            log::warn!("could not reserve room for {} more entries: {}", additional, e);
        }
    }

    /// Grows the table ahead of time so that `additional` more entries fit without another
    /// resize.
    ///
    /// If a resize is already underway, this helps it finish first. Returns
    /// [`Error::CapacityExhausted`] if a larger table cannot be allocated, in which case the
    /// map keeps its current table.
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map: HashMap<u32, u32> = HashMap::new();
    /// let guard = map.guard();
    /// map.try_reserve(1000, &guard).unwrap();
    /// assert!(map.capacity(&guard) >= 1024);
    /// ```
    pub fn try_reserve(&self, additional: usize, guard: &Guard<'_>) -> Result<(), Error> {
        self.check_guard(guard);
        let needed = self.len().saturating_add(additional);
        loop {
            let t = self.current(guard);
            if needed <= t.threshold {
                return Ok(());
            }
            if !self.grow(t, None, None, guard)? {
                std::thread::yield_now();
            }
        }
    }

    /// Moves at most `max_bins` bins of a resize that is underway, if there is one.
    ///
    /// Writers help with resizes on their own; this is for threads that want to push a resize
    /// along in bounded steps. Returns `true` if a resize is still underway when this returns.
    ///
    /// ```
    /// use gust::HashMap;
    ///
    /// let map: HashMap<u32, u32> = HashMap::new();
    /// let guard = map.guard();
    /// while map.help_resize(16, &guard) {}
    /// ```
    pub fn help_resize(&self, max_bins: usize, guard: &Guard<'_>) -> bool {
        self.check_guard(guard);
        let t = self.current(guard);
        if t.resize.phase() != Phase::Transferring {
            return false;
        }
        let next = t.next_table(guard);
        if next.is_null() {
            return true;
        }
        !self.transfer(t, next, Some(max_bins), None, guard)
            && t.resize.phase() != Phase::Done
    }
}

/// The end of a chain, for [`retire_chain`].
#[inline]
fn bin_end<'g, K, V>() -> Shared<'g, BinEntry<K, V>> {
    Shared::null()
}

/// Returns the node behind a pointer loaded from a bin or a `next` link that is known to hold
/// a `Node`.
#[inline]
fn node_of<'g, K, V>(p: Shared<'g, BinEntry<K, V>>) -> &'g Node<K, V> {
    // safety: callers only pass pointers loaded under a guard that lives for 'g.
    match **unsafe { p.deref() } {
        BinEntry::Node(ref node) => node,
        _ => unreachable!("chains only link to nodes"),
    }
}

/// Retires the nodes of a chain from `from` up to (excluding) `until`. The values are left
/// alone.
///
/// # Safety
///
/// The nodes must already be unreachable for threads that start looking after this call.
unsafe fn retire_chain<'g, K, V>(
    from: Shared<'g, BinEntry<K, V>>,
    until: Shared<'g, BinEntry<K, V>>,
    guard: &'g Guard<'_>,
) {
    let mut p = from;
    while p != until {
        let next = node_of(p).next.load(Ordering::Acquire, guard);
        unsafe { p.retire(guard) };
        p = next;
    }
}

impl<K, V, S> PartialEq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.guarded_eq(other, &self.guard(), &other.guard())
    }
}

impl<K, V, S> Eq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, V, S> fmt::Debug for HashMap<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let guard = self.guard();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

impl<K, V, S> Drop for HashMap<K, V, S> {
    fn drop(&mut self) {
        // safety: we have &mut self _and_ all references we have returned are bound to the
        // lifetime of their borrow of self, so there cannot be any outstanding references to
        // anything in the map.
        let table = self.table.load_unprotected();
        let table = unsafe { Box::from_raw(table) };

        // a resize may have been left halfway. the bins it moved already live in the next
        // table, and the rest are still here.
        let next = table.next_table_unprotected();
        unsafe { table.drop_bins() };
        if !next.is_null() {
            // safety: same as above, and only the current table points to its next table
            let next = unsafe { Box::from_raw(next) };
            unsafe { next.drop_bins() };
        }
        // anything retired but not yet reclaimed is freed when the collector is dropped
    }
}

impl<K, V, S> Extend<(K, V)> for &HashMap<K, V, S>
where
    K: 'static + Sync + Send + Clone + Hash + Eq,
    V: 'static + Sync + Send,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        // from `hashbrown::HashMap::extend`:
        // Keys may be already present or show multiple times in the iterator.
        // Reserve the entire hint lower bound if the map is empty.
        // Otherwise reserve half the hint (rounded up), so the map
        // will only resize twice in the worst case.
        let iter = iter.into_iter();
        let reserve = if self.is_empty() {
            iter.size_hint().0
        } else {
            (iter.size_hint().0 + 1) / 2
        };

        let guard = self.guard();
        self.reserve(reserve, &guard);
        (*self).put_all(iter, &guard);
    }
}

impl<'a, K, V, S> Extend<(&'a K, &'a V)> for &HashMap<K, V, S>
where
    K: 'static + Sync + Send + Copy + Hash + Eq,
    V: 'static + Sync + Send + Copy,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (&'a K, &'a V)>>(&mut self, iter: T) {
        self.extend(iter.into_iter().map(|(&key, &value)| (key, value)));
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: 'static + Sync + Send + Clone + Hash + Eq,
    V: 'static + Sync + Send,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        let map = HashMap::with_capacity_and_hasher(lower, S::default());
        {
            let guard = map.guard();
            map.put_all(iter, &guard);
        }
        map
    }
}

impl<'a, K, V, S> FromIterator<(&'a K, &'a V)> for HashMap<K, V, S>
where
    K: 'static + Sync + Send + Copy + Hash + Eq,
    V: 'static + Sync + Send + Copy,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (&'a K, &'a V)>>(iter: T) -> Self {
        Self::from_iter(iter.into_iter().map(|(&k, &v)| (k, v)))
    }
}

impl<K, V, S> Clone for HashMap<K, V, S>
where
    K: 'static + Sync + Send + Clone + Hash + Eq,
    V: 'static + Sync + Send + Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> HashMap<K, V, S> {
        let bins = self.config.table_size_for(self.len()).min(MAXIMUM_CAPACITY);
        let collector = Collector::new();
        let table = Table::new(
            bins,
            self.config.threshold(bins),
            self.config.fair_locks,
            &collector,
        );
        let cloned_map = Self::from_parts(table, self.config, collector, self.build_hasher.clone());
        {
            let guard = self.guard();
            let cloned_guard = cloned_map.guard();
            for (k, v) in self.iter(&guard) {
                cloned_map.insert(k.clone(), v.clone(), &cloned_guard);
            }
        }
        cloned_map
    }
}
