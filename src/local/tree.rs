//! AVL trees threaded through the entry array.
//!
//! Nodes are ordered by `(hash, seq)`. Entries with equal hashes are ordered by insertion, so
//! the order is total even when keys have no order of their own, and a lookup only has to
//! compare keys among the entries that share its hash.

use super::entries::Entries;
use std::borrow::Borrow;
use std::cmp::Ordering;

#[inline]
fn height<K, V>(entries: &Entries<K, V>, node: Option<usize>) -> u8 {
    node.map_or(0, |i| entries[i].height)
}

fn update<K, V>(entries: &mut Entries<K, V>, node: usize) {
    let h = height(entries, entries[node].left).max(height(entries, entries[node].right));
    entries[node].height = h + 1;
}

fn balance<K, V>(entries: &Entries<K, V>, node: usize) -> i16 {
    height(entries, entries[node].left) as i16 - height(entries, entries[node].right) as i16
}

fn rotate_right<K, V>(entries: &mut Entries<K, V>, node: usize) -> usize {
    let pivot = match entries[node].left {
        Some(pivot) => pivot,
        None => return node,
    };
    entries[node].left = entries[pivot].right;
    entries[pivot].right = Some(node);
    update(entries, node);
    update(entries, pivot);
    pivot
}

fn rotate_left<K, V>(entries: &mut Entries<K, V>, node: usize) -> usize {
    let pivot = match entries[node].right {
        Some(pivot) => pivot,
        None => return node,
    };
    entries[node].right = entries[pivot].left;
    entries[pivot].left = Some(node);
    update(entries, node);
    update(entries, pivot);
    pivot
}

/// Restores the AVL property at `node`, whose subtrees are balanced, and returns the root of
/// the subtree.
fn rebalance<K, V>(entries: &mut Entries<K, V>, node: usize) -> usize {
    update(entries, node);
    let b = balance(entries, node);
    if b > 1 {
        if let Some(left) = entries[node].left {
            if balance(entries, left) < 0 {
                entries[node].left = Some(rotate_left(entries, left));
            }
        }
        rotate_right(entries, node)
    } else if b < -1 {
        if let Some(right) = entries[node].right {
            if balance(entries, right) > 0 {
                entries[node].right = Some(rotate_right(entries, right));
            }
        }
        rotate_left(entries, node)
    } else {
        node
    }
}

/// Adds the entry at `new` to the tree rooted at `root`, and returns the new root.
pub(super) fn insert<K, V>(entries: &mut Entries<K, V>, root: Option<usize>, new: usize) -> usize {
    let node = match root {
        None => {
            entries[new].unlink();
            return new;
        }
        Some(node) => node,
    };
    if entries[new].order() < entries[node].order() {
        let left = entries[node].left;
        entries[node].left = Some(insert(entries, left, new));
    } else {
        let right = entries[node].right;
        entries[node].right = Some(insert(entries, right, new));
    }
    rebalance(entries, node)
}

/// Removes the entry at `target` from the tree rooted at `root`, and returns the new root.
pub(super) fn remove<K, V>(entries: &mut Entries<K, V>, root: usize, target: usize) -> Option<usize> {
    let node = root;
    match entries[target].order().cmp(&entries[node].order()) {
        Ordering::Less => {
            if let Some(left) = entries[node].left {
                entries[node].left = remove(entries, left, target);
            }
        }
        Ordering::Greater => {
            if let Some(right) = entries[node].right {
                entries[node].right = remove(entries, right, target);
            }
        }
        Ordering::Equal => {
            let (left, right) = (entries[node].left, entries[node].right);
            entries[node].unlink();
            return match (left, right) {
                (None, only) | (only, None) => only,
                (Some(left), Some(right)) => {
                    let (rest, min) = remove_min(entries, right);
                    entries[min].left = Some(left);
                    entries[min].right = rest;
                    Some(rebalance(entries, min))
                }
            };
        }
    }
    Some(rebalance(entries, node))
}

/// Detaches the leftmost node of the tree rooted at `node`. Returns the remaining tree and
/// the detached node.
fn remove_min<K, V>(entries: &mut Entries<K, V>, node: usize) -> (Option<usize>, usize) {
    match entries[node].left {
        None => {
            let right = entries[node].right;
            entries[node].unlink();
            (right, node)
        }
        Some(left) => {
            let (rest, min) = remove_min(entries, left);
            entries[node].left = rest;
            (Some(rebalance(entries, node)), min)
        }
    }
}

/// Finds the entry holding `key` in the tree rooted at `root`.
pub(super) fn find<K, V, Q>(
    entries: &Entries<K, V>,
    root: Option<usize>,
    hash: u64,
    key: &Q,
) -> Option<usize>
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    let node = root?;
    let e = &entries[node];
    match hash.cmp(&e.hash) {
        Ordering::Less => find(entries, e.left, hash, key),
        Ordering::Greater => find(entries, e.right, hash, key),
        Ordering::Equal if e.key.borrow() == key => Some(node),
        // entries with this hash may sit on either side
        Ordering::Equal => {
            find(entries, e.left, hash, key).or_else(|| find(entries, e.right, hash, key))
        }
    }
}

/// Appends the nodes of the tree rooted at `root` to `out`, in order.
pub(super) fn in_order<K, V>(entries: &Entries<K, V>, root: Option<usize>, out: &mut Vec<usize>) {
    if let Some(node) = root {
        in_order(entries, entries[node].left, out);
        out.push(node);
        in_order(entries, entries[node].right, out);
    }
}

/// Builds a balanced tree out of entries sorted by `(hash, seq)`, and returns its root.
pub(super) fn build<K, V>(entries: &mut Entries<K, V>, sorted: &[usize]) -> Option<usize> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    let node = sorted[mid];
    let left = build(entries, &sorted[..mid]);
    let right = build(entries, &sorted[mid + 1..]);
    let e = &mut entries[node];
    e.next = None;
    e.left = left;
    e.right = right;
    update(entries, node);
    Some(node)
}

#[cfg(test)]
pub(super) fn depth<K, V>(entries: &Entries<K, V>, root: Option<usize>) -> usize {
    root.map_or(0, |node| {
        1 + depth(entries, entries[node].left).max(depth(entries, entries[node].right))
    })
}
