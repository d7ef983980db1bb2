//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::hash::{BuildHasher, Hasher};

/// A hasher that sends every key to bin zero.
#[derive(Default)]
pub struct ZeroHasher;

#[derive(Default, Clone)]
pub struct ZeroHashBuilder;

impl Hasher for ZeroHasher {
    fn finish(&self) -> u64 {
        0
    }
    fn write(&mut self, _: &[u8]) {}
}

impl BuildHasher for ZeroHashBuilder {
    type Hasher = ZeroHasher;

    fn build_hasher(&self) -> ZeroHasher {
        ZeroHasher
    }
}
