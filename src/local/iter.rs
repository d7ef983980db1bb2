use super::entries::Slot;
use super::LocalHashMap;
use crate::Error;
use std::iter::FusedIterator;
use std::{slice, vec};

/// An iterator over the entries of a [`LocalHashMap`].
///
/// See [`LocalHashMap::iter`] for details.
#[derive(Debug)]
pub struct Iter<'a, K, V> {
    pub(super) slots: slice::Iter<'a, Slot<K, V>>,
    pub(super) remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Slot::Occupied(e) = self.slots.next()? {
                self.remaining -= 1;
                return Some((&e.key, &e.value));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            slots: self.slots.clone(),
            remaining: self.remaining,
        }
    }
}

/// A mutable iterator over the entries of a [`LocalHashMap`].
///
/// See [`LocalHashMap::iter_mut`] for details.
#[derive(Debug)]
pub struct IterMut<'a, K, V> {
    pub(super) slots: slice::IterMut<'a, Slot<K, V>>,
    pub(super) remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Slot::Occupied(e) = self.slots.next()? {
                self.remaining -= 1;
                return Some((&e.key, &mut e.value));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// An owning iterator over the entries of a [`LocalHashMap`].
#[derive(Debug)]
pub struct IntoIter<K, V> {
    pub(super) slots: vec::IntoIter<Slot<K, V>>,
    pub(super) remaining: usize,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Slot::Occupied(e) = self.slots.next()? {
                self.remaining -= 1;
                return Some((e.key, e.value));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}
impl<K, V> FusedIterator for IntoIter<K, V> {}

/// An iterator over the keys of a [`LocalHashMap`].
#[derive(Debug, Clone)]
pub struct Keys<'a, K, V> {
    pub(super) inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}
impl<K, V> FusedIterator for Keys<'_, K, V> {}

/// An iterator over the values of a [`LocalHashMap`].
#[derive(Debug, Clone)]
pub struct Values<'a, K, V> {
    pub(super) inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
impl<K, V> FusedIterator for Values<'_, K, V> {}

/// A mutable iterator over the values of a [`LocalHashMap`].
#[derive(Debug)]
pub struct ValuesMut<'a, K, V> {
    pub(super) inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}
impl<K, V> FusedIterator for ValuesMut<'_, K, V> {}

/// A fail-fast traversal of a [`LocalHashMap`] that does not borrow the map between steps.
///
/// A cursor remembers the map's structural generation when it is created. Adding a new key,
/// removing an entry, or clearing the map changes the generation; replacing the value of an
/// existing key or growing the table does not. If the generation has changed when the cursor
/// takes its next step, the step yields [`Error::ConcurrentStructuralChange`] and the
/// traversal is over. Removing the current entry through [`Cursor::remove`] is the one
/// structural change the cursor tolerates.
///
/// A cursor must only be used with the map it was created from.
///
/// ```
/// use gust::LocalHashMap;
///
/// let mut map: LocalHashMap<u32, u32> = (0..10).map(|i| (i, i)).collect();
/// let mut cursor = map.cursor();
/// while let Some(step) = cursor.next(&map) {
///     let (&k, _) = step.unwrap();
///     if k % 2 == 1 {
///         cursor.remove(&mut map).unwrap();
///     }
/// }
/// assert_eq!(map.len(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct Cursor {
    next: usize,
    last: Option<usize>,
    generation: u64,
    done: bool,
}

impl Cursor {
    pub(super) fn new(generation: u64) -> Self {
        Cursor {
            next: 0,
            last: None,
            generation,
            done: false,
        }
    }

    /// Steps to the next entry of `map`.
    ///
    /// Returns `None` once every entry has been visited, or after a
    /// [`ConcurrentStructuralChange`](Error::ConcurrentStructuralChange) has been reported.
    #[allow(clippy::should_implement_trait)]
    pub fn next<'a, K, V, S>(
        &mut self,
        map: &'a LocalHashMap<K, V, S>,
    ) -> Option<Result<(&'a K, &'a V), Error>> {
        if self.done {
            return None;
        }
        if map.generation != self.generation {
            self.done = true;
            return Some(Err(Error::ConcurrentStructuralChange));
        }
        match map.entries.next_occupied(self.next) {
            Some(i) => {
                self.next = i + 1;
                self.last = Some(i);
                let e = &map.entries[i];
                Some(Ok((&e.key, &e.value)))
            }
            None => {
                self.done = true;
                self.last = None;
                None
            }
        }
    }

    /// Removes the entry that the last call to [`next`](Cursor::next) yielded, and returns
    /// it.
    ///
    /// Returns `Ok(None)` if there is no such entry, either because the cursor has not
    /// yielded one yet or because it has already been removed. Returns
    /// [`Error::ConcurrentStructuralChange`] if `map` was structurally modified since the
    /// cursor last looked at it.
    pub fn remove<K, V, S>(&mut self, map: &mut LocalHashMap<K, V, S>) -> Result<Option<(K, V)>, Error> {
        if map.generation != self.generation {
            self.done = true;
            return Err(Error::ConcurrentStructuralChange);
        }
        let i = match self.last.take() {
            Some(i) => i,
            None => return Ok(None),
        };
        let removed = map.remove_at(i);
        self.generation = map.generation;
        Ok(Some(removed))
    }
}
