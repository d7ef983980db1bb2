use super::entries::Entries;
use super::tree;
use crate::UNTREEIFY_THRESHOLD;
use std::borrow::Borrow;

/// A bin of a [`LocalHashMap`](crate::LocalHashMap) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Bin {
    Empty,
    /// A chain of entries linked through `next`.
    List { head: usize, len: usize },
    /// An AVL tree of entries linked through `left` and `right`.
    Tree { root: usize, len: usize },
}

impl Default for Bin {
    fn default() -> Self {
        Bin::Empty
    }
}

impl Bin {
    pub(super) fn len(&self) -> usize {
        match *self {
            Bin::Empty => 0,
            Bin::List { len, .. } | Bin::Tree { len, .. } => len,
        }
    }

    /// Returns the index of the entry holding `key`.
    pub(super) fn find<K, V, Q>(&self, entries: &Entries<K, V>, hash: u64, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        match *self {
            Bin::Empty => None,
            Bin::List { head, .. } => {
                let mut p = Some(head);
                while let Some(i) = p {
                    let e = &entries[i];
                    if e.hash == hash && e.key.borrow() == key {
                        return Some(i);
                    }
                    p = e.next;
                }
                None
            }
            Bin::Tree { root, .. } => tree::find(entries, Some(root), hash, key),
        }
    }

    /// Links the entry at `i` into this bin, and returns the new length of the bin.
    pub(super) fn push<K, V>(&mut self, entries: &mut Entries<K, V>, i: usize) -> usize {
        entries[i].unlink();
        *self = match *self {
            Bin::Empty => Bin::List { head: i, len: 1 },
            Bin::List { head, len } => {
                let mut tail = head;
                while let Some(next) = entries[tail].next {
                    tail = next;
                }
                entries[tail].next = Some(i);
                Bin::List { head, len: len + 1 }
            }
            Bin::Tree { root, len } => Bin::Tree {
                root: tree::insert(entries, Some(root), i),
                len: len + 1,
            },
        };
        self.len()
    }

    /// Unlinks the entry at `i` from this bin. A tree that gets too small becomes a list.
    pub(super) fn unlink<K, V>(&mut self, entries: &mut Entries<K, V>, i: usize) {
        *self = match *self {
            Bin::Empty => unreachable!("unlinked an entry from an empty bin"),
            Bin::List { head, len } => {
                let next = entries[i].next;
                let head = if head == i {
                    next
                } else {
                    let mut p = head;
                    while entries[p].next != Some(i) {
                        p = match entries[p].next {
                            Some(p) => p,
                            None => unreachable!("entry is not in this bin"),
                        };
                    }
                    entries[p].next = next;
                    Some(head)
                };
                match head {
                    Some(head) => Bin::List { head, len: len - 1 },
                    None => Bin::Empty,
                }
            }
            Bin::Tree { root, len } => match tree::remove(entries, root, i) {
                None => Bin::Empty,
                Some(root) if len - 1 < UNTREEIFY_THRESHOLD => {
                    log::trace!("untreeifying bin with {} entries", len - 1);
                    let mut nodes = Vec::with_capacity(len - 1);
                    tree::in_order(entries, Some(root), &mut nodes);
                    link_list(entries, &nodes)
                }
                Some(root) => Bin::Tree { root, len: len - 1 },
            },
        };
        entries[i].unlink();
    }

    /// Turns a list bin into a tree bin holding the same entries.
    pub(super) fn treeify<K, V>(&mut self, entries: &mut Entries<K, V>) {
        if let Bin::List { len, .. } = *self {
            log::trace!("treeifying bin with {} entries", len);
            let mut nodes = self.indices(entries);
            nodes.sort_unstable_by_key(|&i| entries[i].order());
            if let Some(root) = tree::build(entries, &nodes) {
                *self = Bin::Tree { root, len };
            }
        }
    }

    /// The indices of the entries in this bin: in chain order for a list, and in
    /// `(hash, seq)` order for a tree.
    pub(super) fn indices<K, V>(&self, entries: &Entries<K, V>) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len());
        match *self {
            Bin::Empty => {}
            Bin::List { head, .. } => {
                let mut p = Some(head);
                while let Some(i) = p {
                    out.push(i);
                    p = entries[i].next;
                }
            }
            Bin::Tree { root, .. } => tree::in_order(entries, Some(root), &mut out),
        }
        out
    }

    /// Splits this bin in two for a table twice the size: entries whose hash has `bit` clear
    /// go to the first bin, the others to the second. Lists stay lists. Tree halves stay trees
    /// unless they are small enough to be lists.
    pub(super) fn split<K, V>(self, entries: &mut Entries<K, V>, bit: u64) -> (Bin, Bin) {
        let (low, high): (Vec<_>, Vec<_>) = self
            .indices(entries)
            .into_iter()
            .partition(|&i| entries[i].hash & bit == 0);
        match self {
            Bin::Tree { .. } => (tree_of(entries, &low), tree_of(entries, &high)),
            _ => (link_list(entries, &low), link_list(entries, &high)),
        }
    }
}

/// Links `nodes` into a list bin, in order.
fn link_list<K, V>(entries: &mut Entries<K, V>, nodes: &[usize]) -> Bin {
    for (n, &i) in nodes.iter().enumerate() {
        entries[i].unlink();
        entries[i].next = nodes.get(n + 1).copied();
    }
    match nodes.first() {
        Some(&head) => Bin::List {
            head,
            len: nodes.len(),
        },
        None => Bin::Empty,
    }
}

/// Builds the bin for one half of a split tree from nodes sorted by `(hash, seq)`.
fn tree_of<K, V>(entries: &mut Entries<K, V>, sorted: &[usize]) -> Bin {
    if sorted.len() <= UNTREEIFY_THRESHOLD {
        return link_list(entries, sorted);
    }
    match tree::build(entries, sorted) {
        Some(root) => Bin::Tree {
            root,
            len: sorted.len(),
        },
        None => Bin::Empty,
    }
}
