use crate::node::{BinEntry, Node, TreeIter};
use crate::raw::Table;
use crate::reclaim::{Guard, Shared};
use std::fmt;
use std::sync::atomic::Ordering;

/// Walks every node of a table, following forwarding markers into the tables that bins moved
/// to.
///
/// A bin of a table with `n` bins splits into bins `i` and `i + n` of its successor, so after
/// descending into the next table at `i` the walk also visits `i + n` before climbing back up.
/// Each bin of the largest table seen is therefore visited exactly once.
pub(crate) struct NodeIter<'g, K, V> {
    /// Current table; update if resized
    table: Option<&'g Table<K, V>>,

    stack: Option<Box<TableStack<'g, K, V>>>,
    spare: Option<Box<TableStack<'g, K, V>>>,

    /// The last chain entry iterated over
    prev: Option<&'g Node<K, V>>,

    /// The rest of the tree bin being iterated over
    tree: TreeIter<'g, K, V>,

    /// Index of bin to use next
    index: usize,

    /// Current index of initial table
    base_index: usize,

    /// Index bound for initial table
    base_limit: usize,

    /// Initial table size
    base_size: usize,

    guard: &'g Guard<'g>,
}

impl<'g, K, V> NodeIter<'g, K, V> {
    pub(crate) fn new(table: Shared<'g, Table<K, V>>, guard: &'g Guard<'g>) -> Self {
        // safety: a table read under a guard is never dropped or moved until after that guard
        // is dropped.
        let table = unsafe { table.as_ref() }.map(|t| &**t);
        let len = table.map_or(0, |t| t.len());

        Self {
            table,
            stack: None,
            spare: None,
            prev: None,
            tree: TreeIter::empty(),
            base_size: len,
            base_index: 0,
            index: 0,
            base_limit: len,
            guard,
        }
    }

    fn push_state(&mut self, t: &'g Table<K, V>, i: usize, n: usize) {
        let mut s = self.spare.take();
        if let Some(ref mut s) = s {
            self.spare = s.next.take();
        }

        let target = TableStack {
            table: t,
            length: n,
            index: i,
            next: self.stack.take(),
        };

        self.stack = if let Some(mut s) = s {
            *s = target;
            Some(s)
        } else {
            Some(Box::new(target))
        };
    }

    fn recover_state(&mut self, mut n: usize) {
        while let Some(ref mut s) = self.stack {
            if self.index + s.length < n {
                // the high half of the split bin is still to come
                self.index += s.length;
                break;
            }

            // pop the frame, and keep it around for reuse
            let mut s = match self.stack.take() {
                Some(s) => s,
                None => break,
            };
            n = s.length;
            self.index = s.index;
            self.table = Some(s.table);
            self.stack = s.next.take();

            s.next = self.spare.take();
            self.spare = Some(s);
        }

        if self.stack.is_none() {
            // move to the next part of the top-level bin in the largest table
            self.index += self.base_size;
            if self.index >= n {
                self.base_index += 1;
                self.index = self.base_index;
            }
        }
    }
}

impl<'g, K, V> Iterator for NodeIter<'g, K, V> {
    type Item = &'g Node<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(node) = self.tree.next() {
            return Some(&**node);
        }

        if let Some(prev) = self.prev.take() {
            let next = prev.next.load(Ordering::Acquire, self.guard);
            // safety: chains reachable from a bin read under our guard outlive the guard.
            if let Some(next) = unsafe { next.as_ref() } {
                let node = match **next {
                    BinEntry::Node(ref node) => node,
                    _ => unreachable!("chains only link to nodes"),
                };
                self.prev = Some(node);
                return Some(node);
            }
        }

        loop {
            let t = match self.table {
                Some(t) if self.base_index < self.base_limit && self.index < t.len() => t,
                _ => return None,
            };

            let i = self.index;
            let n = t.len();
            let bin = t.bin(i, self.guard);
            let mut e = None;
            // safety: bins read under our guard are not freed before the guard is dropped.
            if let Some(bin) = unsafe { bin.as_ref() } {
                match **bin {
                    BinEntry::Moved => {
                        // safety: see the comment on `Table::next_table`
                        let next = unsafe { t.next_table(self.guard).deref() };
                        self.table = Some(&**next);
                        // make sure we can get back up to where we are
                        self.push_state(t, i, n);
                        continue;
                    }
                    BinEntry::Node(ref node) => {
                        self.prev = Some(node);
                        e = Some(node);
                    }
                    BinEntry::Tree(ref tree) => {
                        self.tree = tree.iter();
                        e = self.tree.next().map(|n| &**n);
                    }
                }
            }

            if self.stack.is_some() {
                self.recover_state(n);
            } else {
                self.index = i + self.base_size;
                if self.index >= n {
                    self.base_index += 1;
                    self.index = self.base_index;
                }
            }

            if e.is_some() {
                return e;
            }
        }
    }
}

impl<K, V> fmt::Debug for NodeIter<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIter")
            .field("table", &self.table)
            .field("tree", &self.tree)
            .field("index", &self.index)
            .field("base_index", &self.base_index)
            .field("base_limit", &self.base_limit)
            .field("base_size", &self.base_size)
            .finish()
    }
}

struct TableStack<'g, K, V> {
    length: usize,
    index: usize,
    table: &'g Table<K, V>,
    next: Option<Box<TableStack<'g, K, V>>>,
}
