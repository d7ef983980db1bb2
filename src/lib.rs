//! Resizable hash maps with tree bins.
//!
//! This crate provides two maps that share one set of bin mechanics:
//!
//!  - [`LocalHashMap`], a single-threaded map whose entries live in a growable backing array
//!    and are linked by index.
//!  - [`HashMap`], a concurrent map in the style of Java's `ConcurrentHashMap`: reads never
//!    lock, writes lock only the bin they touch, and resizes are shared between threads.
//!
//! Both maps hash keys with a [`BuildHasher`](std::hash::BuildHasher) (by default
//! [`ahash::RandomState`]), spread the result (see [`hash::spread`]), and index a power-of-two
//! table of bins. A bin starts out as a short list of entries. When a list grows past
//! [`TREEIFY_THRESHOLD`] entries and the table has at least [`MIN_TREEIFY_CAPACITY`] bins, the
//! bin is turned into a balanced tree ordered by hash, so that even badly distributed keys have
//! logarithmic lookup cost. When a tree shrinks below [`UNTREEIFY_THRESHOLD`] entries it is
//! turned back into a list. Tree nodes with equal hashes are ordered by the sequence number
//! they were inserted with.
//!
//! # Resizing behavior
//!
//! Both maps grow by doubling once the number of entries exceeds `capacity * load_factor`
//! (0.75 by default, see [`Config`]). Each bin is split in two using one more bit of the hash:
//! entries stay at the same index or move to `index + old_capacity`.
//!
//! [`LocalHashMap`] grows in one go. If the larger table cannot be allocated, the map stays as
//! it was; [`LocalHashMap::checked_insert`] and [`LocalHashMap::try_reserve`] report this as
//! [`Error::CapacityExhausted`].
//!
//! [`HashMap`] grows cooperatively. The thread that notices the threshold was crossed
//! allocates the next table, and every writer that comes along afterwards claims a range of
//! bins and moves them over. Moved bins are replaced with a forwarding marker that readers
//! follow and writers use as a cue to help. A helper can stop at any bin boundary (see
//! [`HashMap::help_resize`]); whichever helper leaves last finishes whatever remains.
//!
//! # A note on `Guard` and memory use
//!
//! Since a [`HashMap`] never blocks readers, a value removed by one thread may still be in use
//! by another. The map therefore hands out references that are tied to a [`Guard`], and defers
//! freeing removed keys, values, and tables until no guard that could observe them is alive.
//! Guards are obtained through [`HashMap::guard`], or implicitly through [`HashMap::pin`] which
//! returns a [`HashMapRef`] that carries its own guard.
//!
//! Keep in mind that holding on to a guard for a long time prevents the map from freeing any
//! memory retired in the meantime.
//!
//! ```
//! use gust::HashMap;
//!
//! let map = HashMap::new();
//! let guard = map.guard();
//! map.insert(1, "one", &guard);
//! assert_eq!(map.get(&1, &guard), Some(&"one"));
//!
//! let pinned = map.pin();
//! pinned.insert(2, "two");
//! assert_eq!(pinned.len(), 2);
//! ```
//!
//! # Iteration
//!
//! Iterators over a [`HashMap`] are weakly consistent: they never fail because of concurrent
//! modification, they visit every key that is present for the entire iteration exactly once,
//! and they may or may not reflect changes made while they run.
//!
//! [`LocalHashMap`] additionally offers a fail-fast [`Cursor`]. A cursor does not borrow the
//! map between steps, so the map can be modified while a traversal is underway; if an entry is
//! added or removed behind the cursor's back, the next step yields
//! [`Error::ConcurrentStructuralChange`] and the traversal ends.
//!
//! ```
//! use gust::{Error, LocalHashMap};
//!
//! let mut map = LocalHashMap::new();
//! map.insert("a", 1);
//! map.insert("b", 2);
//!
//! let mut cursor = map.cursor();
//! assert!(cursor.next(&map).unwrap().is_ok());
//! map.remove("a");
//! map.remove("b");
//! assert_eq!(cursor.next(&map), Some(Err(Error::ConcurrentStructuralChange)));
//! assert_eq!(cursor.next(&map), None);
//! ```
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    unreachable_pub,
    rust_2018_idioms
)]
#![allow(clippy::cognitive_complexity)]

mod config;
mod counter;
mod error;
mod lock;
mod map;
mod map_ref;
mod node;
mod raw;
mod reclaim;

pub mod hash;
pub mod iter;
pub mod local;

#[cfg(feature = "rayon")]
mod rayon_impls;

#[cfg(feature = "serde")]
mod serde_impls;

pub use config::Config;
pub use error::{Error, Result};
pub use local::{Cursor, LocalHashMap};
pub use lock::{ReentrantLock, ReentrantLockGuard};
pub use map::HashMap;
pub use map_ref::HashMapRef;
pub use seize::Guard;

/// Default hasher for [`HashMap`] and [`LocalHashMap`].
pub type DefaultHashBuilder = ahash::RandomState;

/// The default initial table capacity.
pub const DEFAULT_CAPACITY: usize = 16;

/// The largest possible table capacity.
pub const MAXIMUM_CAPACITY: usize = 1 << 30;

/// The default load factor: a table grows once it holds more than three entries for every
/// four bins.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// The bin count threshold for using a tree rather than a list for a bin. A list is converted
/// into a tree when adding an element leaves it with more than this many entries.
pub const TREEIFY_THRESHOLD: usize = 8;

/// A tree bin that drops below this many entries after a removal is converted back into a
/// list. When a tree bin is split during a resize, halves with at most this many entries
/// become lists.
pub const UNTREEIFY_THRESHOLD: usize = 6;

/// The smallest table capacity for which bins may be treeified. Smaller tables are grown
/// instead when a bin gets too long.
pub const MIN_TREEIFY_CAPACITY: usize = 64;

/// Returns the number of physical CPUs in the machine (_O(1)_).
#[cfg(not(miri))]
pub(crate) fn num_cpus() -> usize {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Once;

    static NCPU_INITIALIZER: Once = Once::new();
    static NCPU: AtomicUsize = AtomicUsize::new(0);

    NCPU_INITIALIZER.call_once(|| NCPU.store(num_cpus::get_physical(), Ordering::Relaxed));
    NCPU.load(Ordering::Relaxed)
}

#[cfg(miri)]
#[inline]
pub(crate) const fn num_cpus() -> usize {
    1
}
