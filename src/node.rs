use crate::reclaim::{Atomic, Guard, Linked, Shared};
use std::borrow::Borrow;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::{cmp, fmt};

/// Entry in a bin.
///
/// The head of a bin is either a `Node` starting a chain, a `Tree` holding all of the bin's
/// entries, or `Moved` if the bin has been transferred to the next table. Any entry reached
/// through a `next` pointer is a `Node`.
pub(crate) enum BinEntry<K, V> {
    Node(Node<K, V>),
    Tree(TreeBin<K, V>),
    Moved,
}

unsafe impl<K, V> Send for BinEntry<K, V>
where
    K: Send,
    V: Send,
    Node<K, V>: Send,
{
}

unsafe impl<K, V> Sync for BinEntry<K, V>
where
    K: Sync,
    V: Sync,
    Node<K, V>: Sync,
{
}

#[cfg(test)]
impl<K, V> BinEntry<K, V> {
    pub(crate) fn as_node(&self) -> Option<&Node<K, V>> {
        if let BinEntry::Node(ref n) = *self {
            Some(n)
        } else {
            None
        }
    }

    pub(crate) fn as_tree(&self) -> Option<&TreeBin<K, V>> {
        if let BinEntry::Tree(ref t) = *self {
            Some(t)
        } else {
            None
        }
    }
}

/// Key-value entry.
///
/// `seq` is the order in which the entry's key was first inserted into the map, and breaks
/// ties between entries with equal hashes in tree bins.
pub(crate) struct Node<K, V> {
    pub(crate) hash: u64,
    pub(crate) seq: u64,
    pub(crate) key: K,
    pub(crate) value: Atomic<V>,
    pub(crate) next: Atomic<BinEntry<K, V>>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new<AV>(hash: u64, seq: u64, key: K, value: AV) -> Self
    where
        AV: Into<Atomic<V>>,
    {
        Node {
            hash,
            seq,
            key,
            value: value.into(),
            next: Atomic::null(),
        }
    }

    pub(crate) fn with_next<AV>(
        hash: u64,
        seq: u64,
        key: K,
        value: AV,
        next: Atomic<BinEntry<K, V>>,
    ) -> Self
    where
        AV: Into<Atomic<V>>,
    {
        Node {
            hash,
            seq,
            key,
            value: value.into(),
            next,
        }
    }

    /// Copies this node with a cloned key. The copy shares the original's value, and has no
    /// successor.
    pub(crate) fn duplicate(&self, guard: &Guard<'_>) -> Self
    where
        K: Clone,
    {
        Node::new(
            self.hash,
            self.seq,
            self.key.clone(),
            self.value.load(Ordering::Acquire, guard),
        )
    }
}

/// Walks a chain of `Node`s.
pub(crate) struct Chain<'g, 'c, K, V> {
    next: Option<&'g Node<K, V>>,
    guard: &'g Guard<'c>,
}

impl<'g, 'c, K, V> Chain<'g, 'c, K, V> {
    pub(crate) fn new(head: &'g Node<K, V>, guard: &'g Guard<'c>) -> Self {
        Chain {
            next: Some(head),
            guard,
        }
    }
}

impl<'g, K, V> Iterator for Chain<'g, '_, K, V> {
    type Item = &'g Node<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        let next = node.next.load(Ordering::Acquire, self.guard);
        // safety: nodes reachable from a bin read under `guard` are not freed before the
        // guard is dropped.
        self.next = unsafe { next.as_ref() }.map(|next| match **next {
            BinEntry::Node(ref n) => n,
            _ => unreachable!("a chain only links to nodes"),
        });
        Some(node)
    }
}

/// The entries of a bin that has grown too long to be a chain.
///
/// A persistent AVL tree ordered by `(hash, seq)`. Lookups descend on the hash and then
/// compare keys among the entries that share it. A `TreeBin` is never changed in place once
/// published: writers holding the bin lock copy the path from the root to the change, share
/// every other subtree with the current tree, and swap the new root into the bin. Readers
/// therefore never need a lock and never see a half-built tree, and a write allocates
/// `O(log n)` tree nodes.
///
/// The entries themselves are shared between versions, so a value replaced in one version is
/// seen in all of them.
pub(crate) struct TreeBin<K, V> {
    root: Link<K, V>,
    len: usize,
}

type Link<K, V> = Option<Arc<TreeNode<K, V>>>;

struct TreeNode<K, V> {
    node: Arc<Node<K, V>>,
    left: Link<K, V>,
    right: Link<K, V>,
    height: u8,
}

#[inline]
fn height<K, V>(link: &Link<K, V>) -> u8 {
    link.as_ref().map_or(0, |t| t.height)
}

#[inline]
fn order<K, V>(node: &Node<K, V>) -> (u64, u64) {
    (node.hash, node.seq)
}

fn join<K, V>(node: Arc<Node<K, V>>, left: Link<K, V>, right: Link<K, V>) -> Arc<TreeNode<K, V>> {
    let height = height(&left).max(height(&right)) + 1;
    Arc::new(TreeNode {
        node,
        left,
        right,
        height,
    })
}

/// Joins `left` and `right` under `node`, rotating if their heights differ by two.
fn balance<K, V>(
    node: Arc<Node<K, V>>,
    left: Link<K, V>,
    right: Link<K, V>,
) -> Arc<TreeNode<K, V>> {
    let (hl, hr) = (height(&left), height(&right));
    if hl > hr + 1 {
        if let Some(l) = left.as_deref() {
            if height(&l.left) >= height(&l.right) {
                return join(
                    Arc::clone(&l.node),
                    l.left.clone(),
                    Some(join(node, l.right.clone(), right)),
                );
            }
            if let Some(lr) = l.right.as_deref() {
                return join(
                    Arc::clone(&lr.node),
                    Some(join(Arc::clone(&l.node), l.left.clone(), lr.left.clone())),
                    Some(join(node, lr.right.clone(), right)),
                );
            }
        }
    } else if hr > hl + 1 {
        if let Some(r) = right.as_deref() {
            if height(&r.right) >= height(&r.left) {
                return join(
                    Arc::clone(&r.node),
                    Some(join(node, left, r.left.clone())),
                    r.right.clone(),
                );
            }
            if let Some(rl) = r.left.as_deref() {
                return join(
                    Arc::clone(&rl.node),
                    Some(join(node, left, rl.left.clone())),
                    Some(join(Arc::clone(&r.node), rl.right.clone(), r.right.clone())),
                );
            }
        }
    }
    join(node, left, right)
}

fn insert<K, V>(link: &Link<K, V>, node: Arc<Node<K, V>>) -> Arc<TreeNode<K, V>> {
    match link {
        None => join(node, None, None),
        Some(t) if order(&node) < order(&t.node) => balance(
            Arc::clone(&t.node),
            Some(insert(&t.left, node)),
            t.right.clone(),
        ),
        Some(t) => balance(
            Arc::clone(&t.node),
            t.left.clone(),
            Some(insert(&t.right, node)),
        ),
    }
}

/// Removes the node ordered at `at`, which must be in the tree.
fn remove<K, V>(link: &Link<K, V>, at: (u64, u64)) -> Link<K, V> {
    let t = link.as_ref()?;
    let subtree = match at.cmp(&order(&t.node)) {
        cmp::Ordering::Less => balance(Arc::clone(&t.node), remove(&t.left, at), t.right.clone()),
        cmp::Ordering::Greater => {
            balance(Arc::clone(&t.node), t.left.clone(), remove(&t.right, at))
        }
        cmp::Ordering::Equal => match (&t.left, &t.right) {
            (None, right) => return right.clone(),
            (left, None) => return left.clone(),
            (left, Some(right)) => {
                let (min, rest) = remove_min(right);
                balance(min, left.clone(), rest)
            }
        },
    };
    Some(subtree)
}

fn remove_min<K, V>(t: &Arc<TreeNode<K, V>>) -> (Arc<Node<K, V>>, Link<K, V>) {
    match t.left {
        None => (Arc::clone(&t.node), t.right.clone()),
        Some(ref left) => {
            let (min, rest) = remove_min(left);
            (min, Some(balance(Arc::clone(&t.node), rest, t.right.clone())))
        }
    }
}

fn find<'a, K, V, Q>(mut link: &'a Link<K, V>, hash: u64, key: &Q) -> Option<&'a Node<K, V>>
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    while let Some(t) = link.as_deref() {
        match hash.cmp(&t.node.hash) {
            cmp::Ordering::Less => link = &t.left,
            cmp::Ordering::Greater => link = &t.right,
            cmp::Ordering::Equal => {
                if t.node.key.borrow() == key {
                    return Some(&t.node);
                }
                // entries with this hash may sit on either side
                return find(&t.left, hash, key).or_else(|| find(&t.right, hash, key));
            }
        }
    }
    None
}

fn build<K, V>(sorted: &[Arc<Node<K, V>>]) -> Link<K, V> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    Some(join(
        Arc::clone(&sorted[mid]),
        build(&sorted[..mid]),
        build(&sorted[mid + 1..]),
    ))
}

impl<K, V> TreeBin<K, V> {
    pub(crate) fn new(mut nodes: Vec<Node<K, V>>) -> Self {
        nodes.sort_unstable_by_key(order);
        let nodes: Vec<_> = nodes.into_iter().map(Arc::new).collect();
        TreeBin::from_sorted(&nodes)
    }

    /// Builds a tree of entries that are already in `(hash, seq)` order.
    pub(crate) fn from_sorted(nodes: &[Arc<Node<K, V>>]) -> Self {
        debug_assert!(nodes.windows(2).all(|w| order(&w[0]) < order(&w[1])));
        TreeBin {
            root: build(nodes),
            len: nodes.len(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Walks the entries in `(hash, seq)` order.
    pub(crate) fn iter(&self) -> TreeIter<'_, K, V> {
        TreeIter::new(&self.root)
    }

    pub(crate) fn find<Q>(&self, hash: u64, key: &Q) -> Option<&Node<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        find(&self.root, hash, key)
    }

    /// Builds the tree that results from adding `node` to this one.
    pub(crate) fn with(&self, node: Node<K, V>) -> Self {
        TreeBin {
            root: Some(insert(&self.root, Arc::new(node))),
            len: self.len + 1,
        }
    }

    /// Builds the tree that results from removing `node`, an entry of this tree.
    pub(crate) fn without(&self, node: &Node<K, V>) -> Self {
        TreeBin {
            root: remove(&self.root, order(node)),
            len: self.len - 1,
        }
    }

    #[cfg(test)]
    pub(crate) fn height(&self) -> usize {
        height(&self.root) as usize
    }
}

/// In-order walk over a [`TreeBin`].
pub(crate) struct TreeIter<'a, K, V> {
    stack: Vec<&'a TreeNode<K, V>>,
}

impl<'a, K, V> TreeIter<'a, K, V> {
    fn new(root: &'a Link<K, V>) -> Self {
        let mut iter = TreeIter { stack: Vec::new() };
        iter.descend(root);
        iter
    }

    pub(crate) fn empty() -> Self {
        TreeIter { stack: Vec::new() }
    }

    fn descend(&mut self, mut link: &'a Link<K, V>) {
        while let Some(t) = link.as_deref() {
            self.stack.push(t);
            link = &t.left;
        }
    }
}

impl<'a, K, V> Iterator for TreeIter<'a, K, V> {
    type Item = &'a Arc<Node<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        let t = self.stack.pop()?;
        self.descend(&t.right);
        Some(&t.node)
    }
}

impl<K, V> fmt::Debug for TreeIter<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeIter")
            .field("pending", &self.stack.len())
            .finish()
    }
}

/// Links `nodes` into a chain, preserving their order, and returns the head.
pub(crate) fn link_chain<'g, K, V>(
    nodes: Vec<Node<K, V>>,
    collector: &crate::reclaim::Collector,
) -> Shared<'g, BinEntry<K, V>> {
    let mut head = Shared::null();
    for mut node in nodes.into_iter().rev() {
        node.next = Atomic::from(head);
        head = Shared::boxed(BinEntry::Node(node), collector);
    }
    head
}

impl<K, V> TreeBin<K, V> {
    /// Frees every value in the tree.
    ///
    /// # Safety
    ///
    /// No other thread may be able to reach the tree or its values.
    pub(crate) unsafe fn drop_values(&self) {
        for node in self.iter() {
            let value = node.value.load_unprotected();
            if !value.is_null() {
                drop(unsafe { Box::from_raw(value) });
            }
        }
    }
}

/// Frees a chain starting at `head` along with every value in it.
///
/// # Safety
///
/// No other thread may be able to reach the chain or its values.
pub(crate) unsafe fn drop_chain<K, V>(head: *mut Linked<BinEntry<K, V>>) {
    let mut p = head;
    while !p.is_null() {
        let entry = unsafe { Box::from_raw(p) };
        p = match **entry {
            BinEntry::Node(ref node) => {
                let value = node.value.load_unprotected();
                if !value.is_null() {
                    drop(unsafe { Box::from_raw(value) });
                }
                node.next.load_unprotected()
            }
            _ => unreachable!("a chain only links to nodes"),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: u64, seq: u64, key: usize) -> Node<usize, usize> {
        Node::new(hash, seq, key, Atomic::null())
    }

    fn keys(tree: &TreeBin<usize, usize>) -> Vec<usize> {
        tree.iter().map(|n| n.key).collect()
    }

    #[test]
    fn same_hash_stays_balanced() {
        let mut tree = TreeBin::new(Vec::new());
        for k in 0..1000 {
            tree = tree.with(entry(7, k as u64, k));
        }
        assert_eq!(tree.len(), 1000);
        // an AVL tree of 1000 entries is at most 1.44 * log2(1000) high
        assert!(tree.height() <= 15, "height {}", tree.height());
        for k in 0..1000 {
            assert_eq!(tree.find(7, &k).map(|n| n.key), Some(k));
        }
        assert!(tree.find(7, &1000).is_none());
        assert!(tree.find(8, &0).is_none());
        assert_eq!(keys(&tree), (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn orders_by_hash_then_seq() {
        let tree = TreeBin::new(vec![
            entry(3, 5, 30),
            entry(1, 9, 10),
            entry(3, 2, 31),
            entry(2, 0, 20),
        ]);
        assert_eq!(keys(&tree), [10, 20, 31, 30]);
        assert_eq!(tree.height(), 3);
        let tree = tree.with(entry(0, 10, 0)).with(entry(3, 11, 32));
        assert_eq!(keys(&tree), [0, 10, 20, 31, 30, 32]);
    }

    #[test]
    fn remove_keeps_the_rest() {
        let mut tree = TreeBin::new((0..100).map(|k| entry(k as u64 % 4, k as u64, k)).collect());
        for k in (0..100).filter(|k| k % 3 == 0) {
            let hash = k as u64 % 4;
            let n = tree.find(hash, &k).expect("not yet removed");
            tree = tree.without(n);
            assert!(tree.find(hash, &k).is_none());
        }
        assert_eq!(tree.len(), 66);
        assert!(tree.height() <= 9, "height {}", tree.height());
        for k in (0..100).filter(|k| k % 3 != 0) {
            assert_eq!(tree.find(k as u64 % 4, &k).map(|n| n.key), Some(k));
        }
        let mut expected: Vec<_> = (0..100).filter(|k| k % 3 != 0).collect();
        expected.sort_by_key(|&k| (k % 4, k));
        assert_eq!(keys(&tree), expected);
    }

    #[test]
    fn versions_are_independent() {
        let old = TreeBin::new((0..20).map(|k| entry(0, k as u64, k)).collect());
        let n = old.find(0, &4).expect("present");
        let new = old.without(n).with(entry(0, 20, 20));

        assert_eq!(old.len(), 20);
        assert!(old.find(0, &4).is_some());
        assert!(old.find(0, &20).is_none());
        assert!(new.find(0, &4).is_none());
        assert!(new.find(0, &20).is_some());

        // entries that survive are shared, not copied
        for n in new.iter().filter(|n| n.key != 20) {
            assert!(old.iter().any(|o| Arc::ptr_eq(o, n)));
        }
    }

    #[test]
    fn from_sorted_reuses_entries() {
        let tree = TreeBin::new((0..10).map(|k| entry(k as u64, 0, k)).collect());
        let (low, high): (Vec<_>, Vec<_>) = tree.iter().cloned().partition(|n| n.hash & 1 == 0);
        let low = TreeBin::from_sorted(&low);
        let high = TreeBin::from_sorted(&high);
        assert_eq!(keys(&low), [0, 2, 4, 6, 8]);
        assert_eq!(keys(&high), [1, 3, 5, 7, 9]);
        assert_eq!(low.height(), 3);
        assert!(Arc::ptr_eq(
            tree.iter().next().unwrap(),
            low.iter().next().unwrap()
        ));
    }
}
