use gust::{Config, HashMap};
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Keys that are in the map for the whole test.
const RESIDENT: usize = 64;

/// Keys a writer churns through while the readers look for the resident ones.
const CHURN: usize = 4096;

/// Sends keys to one of eight bins, so bins grow long enough to become trees.
#[derive(Default, Clone)]
struct EightBins;

struct EightBinsHasher(u64);

impl Hasher for EightBinsHasher {
    fn finish(&self) -> u64 {
        self.0 % 8
    }
    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.wrapping_mul(31).wrapping_add(u64::from(*b));
        }
    }
}

impl BuildHasher for EightBins {
    type Hasher = EightBinsHasher;

    fn build_hasher(&self) -> EightBinsHasher {
        EightBinsHasher(0)
    }
}

fn resident_keys_stay_visible<S>(map: HashMap<usize, usize, S>)
where
    S: BuildHasher + Send + Sync + 'static,
{
    {
        let guard = map.guard();
        for k in 0..RESIDENT {
            map.insert(k, k, &guard);
        }
    }
    let map = Arc::new(map);
    let done = Arc::new(AtomicBool::new(false));

    // inserting and removing other keys keeps resizes and bin rebuilds going underneath the
    // readers
    let writer = {
        let map = Arc::clone(&map);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let guard = map.guard();
            for k in RESIDENT..RESIDENT + CHURN {
                map.insert(k, k, &guard);
                if k % 3 == 0 {
                    map.remove(&k, &guard);
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..num_cpus::get().clamp(2, 8))
        .map(|_| {
            let map = Arc::clone(&map);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let guard = map.guard();
                    for k in 0..RESIDENT {
                        assert!(map.contains_key(&k, &guard), "lost resident key {}", k);
                        assert_eq!(map.get(&k, &guard), Some(&k));
                    }
                }
            })
        })
        .collect();

    writer.join().expect("writer panicked");
    for r in readers {
        r.join().expect("reader panicked");
    }

    let removed = (RESIDENT..RESIDENT + CHURN).filter(|k| k % 3 == 0).count();
    assert_eq!(map.len(), RESIDENT + CHURN - removed);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_contains_key_while_growing() {
    resident_keys_stay_visible(HashMap::new());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_contains_key_in_tree_bins() {
    let map = HashMap::with_config_and_hasher(Config::default().initial_capacity(64), EightBins)
        .expect("valid config");
    resident_keys_stay_visible(map);
}
