//! A single-threaded hash map with tree bins.
//!
//! [`LocalHashMap`] keeps its entries in one growable array and links them into bins by
//! index, so a bin costs no allocation of its own and entries never move once inserted. It
//! uses the same table layout, hash spreading, and treeify rules as the concurrent
//! [`HashMap`](crate::HashMap), without any of the synchronization.

mod bin;
mod entries;
mod iter;
mod tree;

pub use iter::{Cursor, IntoIter, Iter, IterMut, Keys, Values, ValuesMut};

use crate::hash::hash_key;
use crate::{Config, Error, MAXIMUM_CAPACITY, MIN_TREEIFY_CAPACITY, TREEIFY_THRESHOLD};
use bin::Bin;
use entries::{Entries, Entry};
use std::borrow::Borrow;
use std::fmt::{self, Debug, Formatter};
use std::hash::{BuildHasher, Hash};
use std::iter::FromIterator;
use std::ops::Index;

/// A hash map for use from a single thread.
///
/// Lookups, insertions, and removals take expected constant time. Keys whose hashes collide
/// are kept in a balanced tree once there are more than [`TREEIFY_THRESHOLD`] of them in one
/// bin, so even adversarial keys cost logarithmic time.
///
/// # Examples
///
/// ```
/// use gust::LocalHashMap;
///
/// let mut map = LocalHashMap::new();
/// map.insert("a", 1);
/// map.insert("b", 2);
/// assert_eq!(map.get("a"), Some(&1));
/// assert_eq!(map.insert("a", 3), Some(1));
/// assert_eq!(map.remove("b"), Some(2));
/// assert_eq!(map.len(), 1);
/// ```
pub struct LocalHashMap<K, V, S = crate::DefaultHashBuilder> {
    entries: Entries<K, V>,
    bins: Vec<Bin>,

    /// The number of entries above which the table grows.
    threshold: usize,

    /// Changes whenever an entry is added or removed. Checked by [`Cursor`]s.
    generation: u64,

    /// Hands out the insertion order used to break ties in tree bins.
    seq: u64,

    config: Config,
    build_hasher: S,
}

impl<K, V> LocalHashMap<K, V, crate::DefaultHashBuilder> {
    /// Creates an empty map with the default initial table size (16).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty map with a table large enough to hold `capacity` entries without
    /// growing.
    ///
    /// Capacities above [`MAXIMUM_CAPACITY`] are clamped to it.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, crate::DefaultHashBuilder::default())
    }

    /// Creates an empty map with `capacity` bins and the given load factor.
    ///
    /// Returns [`Error::Validation`] if the parameters are out of range, and
    /// [`Error::CapacityExhausted`] if the table cannot be allocated.
    ///
    /// ```
    /// use gust::{Error, LocalHashMap};
    ///
    /// let map = LocalHashMap::<u8, u8>::with_capacity_and_load_factor(20, 1.0).unwrap();
    /// assert_eq!(map.capacity(), 32);
    /// assert_eq!(map.load_factor(), 1.0);
    ///
    /// assert!(matches!(
    ///     LocalHashMap::<u8, u8>::with_capacity_and_load_factor(20, f32::NAN),
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

    /// Creates an empty map as described by `config`.
    pub fn with_config(config: Config) -> Result<Self, Error> {
        Self::with_config_and_hasher(config, crate::DefaultHashBuilder::default())
    }
}

impl<K, V, S: Default> Default for LocalHashMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> LocalHashMap<K, V, S> {
    /// Creates an empty map which will use `hash_builder` to hash keys.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(crate::DEFAULT_CAPACITY, hash_builder)
    }

    /// Creates an empty map with room for `capacity` entries, using `hash_builder` to hash
    /// keys.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let config = Config::default();
        let size = config.table_size_for(capacity.min(MAXIMUM_CAPACITY));
        Self::from_parts(vec![Bin::Empty; size], config, hash_builder)
    }

    /// Creates an empty map as described by `config`, using `hash_builder` to hash keys.
    pub fn with_config_and_hasher(config: Config, hash_builder: S) -> Result<Self, Error> {
        config.validate()?;
        let bins = alloc_bins(config.table_size())?;
        Ok(Self::from_parts(bins, config, hash_builder))
    }

    fn from_parts(bins: Vec<Bin>, config: Config, build_hasher: S) -> Self {
        Self {
            entries: Entries::new(),
            threshold: config.threshold(bins.len()),
            bins,
            generation: 0,
            seq: 0,
            config,
            build_hasher,
        }
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of bins in the table.
    pub fn capacity(&self) -> usize {
        self.bins.len()
    }

    /// Returns the ratio of entries to bins above which the table grows.
    pub fn load_factor(&self) -> f32 {
        self.config.load_factor
    }

    /// Returns the configuration this map was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a reference to the map's [`BuildHasher`].
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }

    /// Removes every entry. The table keeps its size.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bins.iter_mut().for_each(|bin| *bin = Bin::Empty);
        self.generation += 1;
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.entries.raw().iter(),
            remaining: self.entries.len(),
        }
    }

    /// An iterator visiting all key-value pairs in arbitrary order, with mutable references to
    /// the values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        let remaining = self.entries.len();
        IterMut {
            slots: self.entries.raw_mut().iter_mut(),
            remaining,
        }
    }

    /// An iterator visiting all keys in arbitrary order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// An iterator visiting all values in arbitrary order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// An iterator visiting all values mutably in arbitrary order.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Starts a fail-fast traversal of the map. See [`Cursor`].
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.generation)
    }

    #[inline]
    fn bini(&self, hash: u64) -> usize {
        (hash & (self.bins.len() as u64 - 1)) as usize
    }

    /// Unlinks and frees the entry at `i`.
    fn remove_at(&mut self, i: usize) -> (K, V) {
        let b = self.bini(self.entries[i].hash);
        self.bins[b].unlink(&mut self.entries, i);
        let entry = self.entries.remove(i);
        self.generation += 1;
        (entry.key, entry.value)
    }

    /// Doubles the number of bins.
    ///
    /// Each bin is split in two using one more bit of the hash: entries stay at the same
    /// index or move up by the old capacity. If the larger table cannot be allocated,
    /// [`Error::CapacityExhausted`] is returned and the map is left as it was. At
    /// [`MAXIMUM_CAPACITY`] this does nothing.
    pub fn resize(&mut self) -> Result<(), Error> {
        let n = self.bins.len();
        if n >= MAXIMUM_CAPACITY {
            return Ok(());
        }
        let mut bins = alloc_bins(n << 1)?;
        for (i, bin) in self.bins.iter().enumerate() {
            let (low, high) = bin.split(&mut self.entries, n as u64);
            bins[i] = low;
            bins[i + n] = high;
        }
        log::debug!("resized table from {} to {} bins", n, n << 1);
        self.bins = bins;
        self.threshold = self.config.threshold(n << 1);
        Ok(())
    }

    /// Grows the table so that `additional` more entries fit without another resize.
    ///
    /// ```
    /// use gust::LocalHashMap;
    ///
    /// let mut map: LocalHashMap<u32, u32> = LocalHashMap::new();
    /// map.try_reserve(100).unwrap();
    /// assert_eq!(map.capacity(), 256);
    /// ```
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), Error> {
        let needed = self.len().saturating_add(additional);
        while needed > self.threshold && self.bins.len() < MAXIMUM_CAPACITY {
            self.resize()?;
        }
        Ok(())
    }

    /// Grows the table so that `additional` more entries fit without another resize.
    ///
    /// Failure to allocate is logged and otherwise ignored. Use
    /// [`try_reserve`](Self::try_reserve) to observe it.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(e) = self.try_reserve(additional) {
            log::warn!("could not reserve room for {} more entries: {}", additional, e);
        }
    }

    /// Links a new entry for a key that is not in the map yet, and treeifies its bin if it
    /// has become too long. Returns `true` if the bin is too long but the table is too small
    /// for a tree.
    fn link(&mut self, hash: u64, key: K, value: V) -> bool {
        let seq = self.seq;
        self.seq += 1;
        let i = self.entries.insert(Entry::new(hash, seq, key, value));
        let b = self.bini(hash);
        let len = self.bins[b].push(&mut self.entries, i);
        self.generation += 1;
        if len > TREEIFY_THRESHOLD && matches!(self.bins[b], Bin::List { .. }) {
            if self.bins.len() < MIN_TREEIFY_CAPACITY {
                return true;
            }
            self.bins[b].treeify(&mut self.entries);
        }
        false
    }

    #[cfg(test)]
    fn bin(&self, i: usize) -> Bin {
        self.bins[i]
    }
}

impl<K, V, S> LocalHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash<Q: ?Sized + Hash>(&self, key: &Q) -> u64 {
        hash_key(&self.build_hasher, key)
    }

    fn find<Q>(&self, hash: u64, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.bins[self.bini(hash)].find(&self.entries, hash, key)
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the map's key type, but [`Hash`] and [`Eq`] on the
    /// borrowed form *must* match those for the key type.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let i = self.find(self.hash(key), key)?;
        Some(&self.entries[i].value)
    }

    /// Returns a mutable reference to the value corresponding to the key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let i = self.find(self.hash(key), key)?;
        Some(&mut self.entries[i].value)
    }

    /// Returns the key-value pair corresponding to the key.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let i = self.find(self.hash(key), key)?;
        let e = &self.entries[i];
        Some((&e.key, &e.value))
    }

    /// Returns `true` if the map contains a value for the specified key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(self.hash(key), key).is_some()
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map did not have this key present, [`None`] is returned. Otherwise the value is
    /// replaced, the old value is returned, and the key is left unchanged.
    ///
    /// If the table should grow afterwards but a larger table cannot be allocated, a warning
    /// is logged and the map keeps its current table. Use
    /// [`checked_insert`](Self::checked_insert) to observe that instead.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.hash(&key);
        if let Some(i) = self.find(hash, &key) {
            return Some(std::mem::replace(&mut self.entries[i].value, value));
        }

        let crowded = self.link(hash, key, value);
        if crowded || self.len() > self.threshold {
            if let Err(e) = self.resize() {
                log::warn!("could not grow table beyond {} bins: {}", self.bins.len(), e);
            }
        }
        None
    }

    /// Inserts a key-value pair into the map, growing the table _before_ linking a new entry.
    ///
    /// If the table has to grow and a larger one cannot be allocated, this returns
    /// [`Error::CapacityExhausted`] and leaves the map untouched.
    ///
    /// ```
    /// use gust::LocalHashMap;
    ///
    /// let mut map = LocalHashMap::new();
    /// assert_eq!(map.checked_insert(1, "a"), Ok(None));
    /// assert_eq!(map.checked_insert(1, "b"), Ok(Some("a")));
    /// ```
    pub fn checked_insert(&mut self, key: K, value: V) -> Result<Option<V>, Error> {
        let hash = self.hash(&key);
        if let Some(i) = self.find(hash, &key) {
            return Ok(Some(std::mem::replace(&mut self.entries[i].value, value)));
        }

        let crowded = matches!(
            self.bins[self.bini(hash)],
            Bin::List { len, .. } if len >= TREEIFY_THRESHOLD
        ) && self.bins.len() < MIN_TREEIFY_CAPACITY;
        if crowded || self.len() + 1 > self.threshold {
            self.resize()?;
        }
        Ok(self.insert(key, value))
    }

    /// Removes a key from the map, returning the value at the key if the key was previously in
    /// the map.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes a key from the map, returning the stored key and value if the key was
    /// previously in the map.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let i = self.find(self.hash(key), key)?;
        Some(self.remove_at(i))
    }

    /// Retains only the entries for which `f` returns `true`.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut cursor = 0;
        while let Some(i) = self.entries.next_occupied(cursor) {
            cursor = i + 1;
            let e = &mut self.entries[i];
            if !f(&e.key, &mut e.value) {
                self.remove_at(i);
            }
        }
    }
}

fn alloc_bins(size: usize) -> Result<Vec<Bin>, Error> {
    let mut bins = Vec::new();
    bins.try_reserve_exact(size)
        .map_err(|_| Error::CapacityExhausted { requested: size })?;
    bins.resize(size, Bin::Empty);
    Ok(bins)
}

impl<K, V, S> PartialEq for LocalHashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, S> Eq for LocalHashMap<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, V, S> Debug for LocalHashMap<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Clone for LocalHashMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            bins: self.bins.clone(),
            threshold: self.threshold,
            generation: self.generation,
            seq: self.seq,
            config: self.config,
            build_hasher: self.build_hasher.clone(),
        }
    }
}

impl<K, Q, V, S> Index<&Q> for LocalHashMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<K, V, S> Extend<(K, V)> for LocalHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        // keys may repeat, so only reserve the whole hint for an empty map
        let iter = iter.into_iter();
        let reserve = if self.is_empty() {
            iter.size_hint().0
        } else {
            (iter.size_hint().0 + 1) / 2
        };
        self.reserve(reserve);
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<'a, K, V, S> Extend<(&'a K, &'a V)> for LocalHashMap<K, V, S>
where
    K: Hash + Eq + Copy,
    V: Copy,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (&'a K, &'a V)>>(&mut self, iter: T) {
        self.extend(iter.into_iter().map(|(&k, &v)| (k, v)));
    }
}

impl<K, V, S> FromIterator<(K, V)> for LocalHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity_and_hasher(iter.size_hint().0, S::default());
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S> IntoIterator for &'a LocalHashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut LocalHashMap<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<K, V, S> IntoIterator for LocalHashMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let remaining = self.entries.len();
        IntoIter {
            slots: self.entries.into_raw().into_iter(),
            remaining,
        }
    }
}
