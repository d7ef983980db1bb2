use gust::HashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Number of entries for each thread to place in the map.
const NUM_ENTRIES: usize = 128;

/// Number of iterations for each test
const ITERATIONS: usize = 64;

#[derive(Hash, PartialEq, Eq, Clone, Copy)]
struct KeyVal {
    _data: usize,
}

impl KeyVal {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self { _data: rng.gen() }
    }
}

fn insert(map: Arc<HashMap<KeyVal, KeyVal>>, k: KeyVal) {
    map.insert(k, k, &map.guard());
}

fn insert_pinned(map: Arc<HashMap<KeyVal, KeyVal>>, k: KeyVal) {
    map.pin().insert(k, k);
}

fn insert_with_deadline(map: Arc<HashMap<KeyVal, KeyVal>>, k: KeyVal) {
    // nobody holds a bin lock for long here, so a generous deadline always suffices
    map.try_insert_for(k, k, Duration::from_secs(10), &map.guard())
        .expect("bin lock held for ten seconds");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_insert() {
    test(insert);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_insert_pinned() {
    test(insert_pinned);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_try_insert_for() {
    test(insert_with_deadline);
}

fn test<F>(associator: F)
where
    F: Fn(Arc<HashMap<KeyVal, KeyVal>>, KeyVal) + Send + Copy + 'static,
{
    for _ in 0..ITERATIONS {
        test_once(associator);
    }
}

fn test_once<F>(associator: F)
where
    F: Fn(Arc<HashMap<KeyVal, KeyVal>>, KeyVal) + Send + Copy + 'static,
{
    let map = Arc::new(HashMap::new());
    let mut threads = Vec::new();
    for _ in 0..num_cpus::get().min(8) {
        let map = map.clone();
        let handle = std::thread::spawn(move || {
            for _ in 0..NUM_ENTRIES {
                let key = KeyVal::new();
                associator(map.clone(), key);
                assert!(map.contains_key(&key, &map.guard()));
            }
        });
        threads.push(handle);
    }
    for t in threads {
        t.join().expect("failed to join thread");
    }
}
