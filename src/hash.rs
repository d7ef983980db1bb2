//! Hash spreading.
//!
//! Tables index bins with the low bits of a key's hash. Hash functions that only vary in their
//! high bits (say, keys that are multiples of a large power of two hashed with an identity
//! hasher) would then pile every key into the same bin. [`spread`] folds the upper half of the
//! hash into the lower half so that all bits take part in choosing a bin.

use std::hash::{BuildHasher, Hash, Hasher};

/// Spreads the high bits of `hash` into its low bits.
///
/// This is a pure function: equal inputs always produce equal outputs, so keys that are equal
/// (and therefore hash equally) always land in the same bin.
///
/// ```
/// use gust::hash::spread;
///
/// assert_eq!(spread(0), 0);
/// assert_eq!(spread(7), 7);
/// assert_eq!(spread(1 << 32) & 0xff, 1);
/// ```
#[inline]
pub fn spread(hash: u64) -> u64 {
    hash ^ (hash >> 32)
}

/// Hashes `key` with a fresh hasher from `build_hasher` and spreads the result.
#[inline]
pub(crate) fn hash_key<Q, S>(build_hasher: &S, key: &Q) -> u64
where
    Q: ?Sized + Hash,
    S: BuildHasher,
{
    let mut h = build_hasher.build_hasher();
    key.hash(&mut h);
    spread(h.finish())
}
