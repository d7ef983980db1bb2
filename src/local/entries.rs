use std::ops::{Index, IndexMut};

/// A key-value entry of a [`LocalHashMap`](crate::LocalHashMap).
///
/// Entries never move once stored. Bins refer to them by their index in [`Entries`], and link
/// them to each other the same way: through `next` in a list bin, and through `left` and
/// `right` in a tree bin.
#[derive(Debug, Clone)]
pub(super) struct Entry<K, V> {
    pub(super) hash: u64,
    pub(super) seq: u64,
    pub(super) key: K,
    pub(super) value: V,
    pub(super) next: Option<usize>,
    pub(super) left: Option<usize>,
    pub(super) right: Option<usize>,
    pub(super) height: u8,
}

impl<K, V> Entry<K, V> {
    pub(super) fn new(hash: u64, seq: u64, key: K, value: V) -> Self {
        Entry {
            hash,
            seq,
            key,
            value,
            next: None,
            left: None,
            right: None,
            height: 1,
        }
    }

    /// The position of this entry in a tree bin.
    #[inline]
    pub(super) fn order(&self) -> (u64, u64) {
        (self.hash, self.seq)
    }

    pub(super) fn unlink(&mut self) {
        self.next = None;
        self.left = None;
        self.right = None;
        self.height = 1;
    }
}

#[derive(Debug, Clone)]
pub(super) enum Slot<K, V> {
    Occupied(Entry<K, V>),
    Vacant { next_free: Option<usize> },
}

/// The backing array of a [`LocalHashMap`](crate::LocalHashMap).
///
/// Removed entries leave a vacant slot behind that is reused by the next insertion, so the
/// index of an entry stays valid for as long as the entry is in the map.
#[derive(Debug, Clone)]
pub(super) struct Entries<K, V> {
    slots: Vec<Slot<K, V>>,
    free: Option<usize>,
    len: usize,
}

impl<K, V> Entries<K, V> {
    pub(super) fn new() -> Self {
        Entries {
            slots: Vec::new(),
            free: None,
            len: 0,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    /// The number of slots, occupied or not. Every entry index is below this.
    #[cfg(test)]
    pub(super) fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Stores `entry` and returns its index.
    pub(super) fn insert(&mut self, entry: Entry<K, V>) -> usize {
        self.len += 1;
        match self.free {
            Some(i) => {
                self.free = match self.slots[i] {
                    Slot::Vacant { next_free } => next_free,
                    Slot::Occupied(_) => unreachable!("free list only links vacant slots"),
                };
                self.slots[i] = Slot::Occupied(entry);
                i
            }
            None => {
                self.slots.push(Slot::Occupied(entry));
                self.slots.len() - 1
            }
        }
    }

    /// Takes the entry at `i` out, and puts its slot on the free list.
    pub(super) fn remove(&mut self, i: usize) -> Entry<K, V> {
        let vacant = Slot::Vacant {
            next_free: self.free,
        };
        match std::mem::replace(&mut self.slots[i], vacant) {
            Slot::Occupied(entry) => {
                self.free = Some(i);
                self.len -= 1;
                entry
            }
            Slot::Vacant { .. } => unreachable!("removed a vacant slot"),
        }
    }

    #[cfg(test)]
    pub(super) fn get(&self, i: usize) -> Option<&Entry<K, V>> {
        match self.slots.get(i) {
            Some(Slot::Occupied(entry)) => Some(entry),
            _ => None,
        }
    }

    pub(super) fn clear(&mut self) {
        self.slots.clear();
        self.free = None;
        self.len = 0;
    }

    pub(super) fn raw(&self) -> &[Slot<K, V>] {
        &self.slots
    }

    pub(super) fn raw_mut(&mut self) -> &mut [Slot<K, V>] {
        &mut self.slots
    }

    pub(super) fn into_raw(self) -> Vec<Slot<K, V>> {
        self.slots
    }

    /// Finds the first occupied slot at or after `from`.
    pub(super) fn next_occupied(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&i| matches!(self.slots[i], Slot::Occupied(_)))
    }
}

impl<K, V> Index<usize> for Entries<K, V> {
    type Output = Entry<K, V>;

    fn index(&self, i: usize) -> &Entry<K, V> {
        match self.slots[i] {
            Slot::Occupied(ref entry) => entry,
            Slot::Vacant { .. } => unreachable!("bins only link occupied slots"),
        }
    }
}

impl<K, V> IndexMut<usize> for Entries<K, V> {
    fn index_mut(&mut self, i: usize) -> &mut Entry<K, V> {
        match self.slots[i] {
            Slot::Occupied(ref mut entry) => entry,
            Slot::Vacant { .. } => unreachable!("bins only link occupied slots"),
        }
    }
}
