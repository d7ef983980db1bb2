use crate::{HashMap, LocalHashMap};
use rayon::iter::{FromParallelIterator, IntoParallelIterator, ParallelExtend, ParallelIterator};
use std::hash::{BuildHasher, Hash};

impl<K, V, S> ParallelExtend<(K, V)> for HashMap<K, V, S>
where
    K: 'static + Sync + Send + Clone + Hash + Eq,
    V: 'static + Sync + Send,
    S: BuildHasher + Sync,
{
    // of limited use given `&mut self`; see `par_extend_sync`
    fn par_extend<I>(&mut self, par_iter: I)
    where
        I: IntoParallelIterator<Item = (K, V)>,
    {
        self.par_extend_sync(par_iter);
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: 'static + Sync + Send + Clone + Hash + Eq,
    V: 'static + Sync + Send,
    S: BuildHasher + Sync,
{
    /// Inserts every pair of a parallel iterator, from as many threads as rayon provides.
    ///
    /// Unlike [`ParallelExtend::par_extend`], this only needs a shared reference, so other
    /// threads may keep using the map in the meantime.
    ///
    /// ```
    /// use gust::HashMap;
    /// use rayon::iter::{IntoParallelIterator, ParallelIterator};
    ///
    /// let map = HashMap::new();
    /// map.par_extend_sync((0..1000).into_par_iter().map(|i| (i, i * 2)));
    /// assert_eq!(map.len(), 1000);
    /// assert_eq!(map.pin().get(&999), Some(&1998));
    /// ```
    pub fn par_extend_sync<I>(&self, par_iter: I)
    where
        I: IntoParallelIterator<Item = (K, V)>,
    {
        par_iter.into_par_iter().for_each_init(
            || self.guard(),
            |guard, (k, v)| {
                self.insert(k, v, guard);
            },
        );
    }
}

impl<K, V, S> FromParallelIterator<(K, V)> for HashMap<K, V, S>
where
    K: 'static + Sync + Send + Clone + Hash + Eq,
    V: 'static + Sync + Send,
    S: BuildHasher + Default + Sync,
{
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: IntoParallelIterator<Item = (K, V)>,
    {
        let mut created_map = HashMap::with_hasher(S::default());
        created_map.par_extend(par_iter);
        created_map
    }
}

impl<K, V, S> ParallelExtend<(K, V)> for LocalHashMap<K, V, S>
where
    K: Send + Hash + Eq,
    V: Send,
    S: BuildHasher,
{
    fn par_extend<I>(&mut self, par_iter: I)
    where
        I: IntoParallelIterator<Item = (K, V)>,
    {
        // the map itself is single-threaded, so collect the pairs in parallel and insert them
        // from here
        let pairs: Vec<(K, V)> = par_iter.into_par_iter().collect();
        self.extend(pairs);
    }
}

impl<K, V, S> FromParallelIterator<(K, V)> for LocalHashMap<K, V, S>
where
    K: Send + Hash + Eq,
    V: Send,
    S: BuildHasher + Default,
{
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: IntoParallelIterator<Item = (K, V)>,
    {
        let mut created_map = LocalHashMap::with_hasher(S::default());
        created_map.par_extend(par_iter);
        created_map
    }
}
