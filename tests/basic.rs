mod common;

use common::ZeroHashBuilder;
use gust::*;
use std::iter::FromIterator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

#[test]
fn empty_map() {
    let map = HashMap::<usize, usize>::new();
    let guard = map.guard();
    assert!(map.get(&42, &guard).is_none());
    assert!(map.get_key_value(&42, &guard).is_none());
    assert!(!map.contains_key(&42, &guard));
    assert!(map.remove(&42, &guard).is_none());
    assert!(map.remove_entry(&42, &guard).is_none());
    assert!(map.is_empty());
    assert_eq!(map.capacity(&guard), DEFAULT_CAPACITY);
    assert!(!map.help_resize(16, &guard));
}

#[test]
fn entry_lifecycle() {
    let map = HashMap::<usize, &'static str>::new();
    let guard = map.guard();

    assert_eq!(map.insert(7, "seven", &guard), None);
    assert_eq!(map.get_key_value(&7, &guard), Some((&7, &"seven")));
    assert_eq!(map.insert(7, "SEVEN", &guard), Some(&"seven"));
    assert_eq!(map.len(), 1);

    // a reference handed out before a replacement stays valid while its guard lives
    let before = map.get(&7, &guard).unwrap();
    assert_eq!(map.insert(7, "sept", &guard), Some(&"SEVEN"));
    assert_eq!(before, &"SEVEN");

    assert_eq!(map.remove_entry(&7, &guard), Some((&7, &"sept")));
    assert_eq!(map.remove(&7, &guard), None);
    assert!(map.is_empty());
}

#[test]
fn one_bin_head_middle_tail() {
    let map = HashMap::<&'static str, usize, _>::with_hasher(ZeroHashBuilder);
    let guard = map.guard();
    let keys = ["head", "middle", "tail"];

    for (i, k) in keys.iter().enumerate() {
        assert_eq!(map.insert(k, i, &guard), None);
    }
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(map.insert(k, i + 10, &guard), Some(&i));
    }
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(map.get(k, &guard), Some(&(i + 10)));
    }

    // unlink from the middle, then the tail, then the head
    for &i in &[1, 2, 0] {
        assert_eq!(map.remove(keys[i], &guard), Some(&(i + 10)));
        assert!(!map.contains_key(keys[i], &guard));
    }
    assert!(map.is_empty());
}

#[test]
fn colliding_keys_through_tree_and_back() {
    let map = HashMap::<usize, usize, _>::with_capacity_and_hasher(64, ZeroHashBuilder);
    let guard = map.guard();
    for i in 0..100 {
        assert_eq!(map.insert(i, i, &guard), None);
    }
    for i in 0..100 {
        assert_eq!(map.insert(i, i * 2, &guard), Some(&i));
    }
    // shrink the bin far enough that it turns back into a list
    for i in 5..100 {
        assert_eq!(map.remove(&i, &guard), Some(&(i * 2)));
    }
    assert_eq!(map.len(), 5);
    for i in 0..100 {
        let expected = if i < 5 { Some(i * 2) } else { None };
        assert_eq!(map.get(&i, &guard).copied(), expected);
    }
    let mut keys: Vec<_> = map.keys(&guard).copied().collect();
    keys.sort_unstable();
    assert_eq!(keys, [0, 1, 2, 3, 4]);
}

#[test]
fn grows_at_three_quarters() {
    let map = HashMap::<usize, usize>::new();
    let guard = map.guard();
    let mut last = map.capacity(&guard);
    let mut growths = Vec::new();
    for n in 1..=200 {
        map.insert(n, n, &guard);
        let cap = map.capacity(&guard);
        if cap != last {
            growths.push((n, cap));
            last = cap;
        }
    }
    assert_eq!(growths, [(13, 32), (25, 64), (49, 128), (97, 256), (193, 512)]);
}

#[test]
fn bad_configs_are_rejected() {
    assert!(matches!(
        HashMap::<usize, usize>::with_capacity_and_load_factor(16, 0.0),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        HashMap::<usize, usize>::with_capacity_and_load_factor(16, f32::NAN),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        HashMap::<usize, usize>::with_config(Config::default().initial_capacity(usize::MAX)),
        Err(Error::Validation(_))
    ));
    let map = HashMap::<usize, usize>::with_capacity_and_load_factor(100, 0.5).unwrap();
    assert_eq!(map.capacity(&map.guard()), 128);
    assert_eq!(map.config().load_factor, 0.5);
}

#[test]
fn bounded_waits_succeed_without_contention() {
    let map = HashMap::<usize, usize>::with_config(Config::default().fair_locks(true)).unwrap();
    let guard = map.guard();
    let timeout = Duration::from_millis(100);
    assert_eq!(map.try_insert_for(1, 1, timeout, &guard), Ok(None));
    assert_eq!(map.try_insert_for(1, 2, timeout, &guard), Ok(Some(&1)));
    assert_eq!(map.try_remove_for(&1, timeout, &guard), Ok(Some(&2)));
    assert_eq!(map.try_remove_for(&1, timeout, &guard), Ok(None));
}

#[test]
#[cfg_attr(miri, ignore)]
fn bounded_waits_across_resizes() {
    // generous timeouts: every write gets through, including the ones that help a resize
    let map = Arc::new(HashMap::<usize, usize>::new());
    let barrier = Arc::new(Barrier::new(4));
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let guard = map.guard();
                barrier.wait();
                for i in 0..2000 {
                    let key = t * 2000 + i;
                    let timeout = Duration::from_secs(5);
                    assert_eq!(map.try_insert_for(key, key, timeout, &guard), Ok(None));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let guard = map.guard();
    assert_eq!(map.len(), 8000);
    assert!(map.capacity(&guard) >= 8192);
    for i in 0..8000 {
        assert_eq!(map.get(&i, &guard), Some(&i));
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn racing_writers_leave_one_value() {
    let map = Arc::new(HashMap::<usize, usize>::new());
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let map = Arc::clone(&map);
            std::thread::spawn(move || {
                let guard = map.guard();
                for i in 0..64 {
                    map.insert(i, t, &guard);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let guard = map.guard();
    assert_eq!(map.len(), 64);
    for i in 0..64 {
        let (k, v) = map.get_key_value(&i, &guard).unwrap();
        assert_eq!(k, &i);
        assert!(*v < 4);
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn racing_removers_remove_once() {
    let map = Arc::new(HashMap::<usize, usize>::new());
    {
        let guard = map.guard();
        for i in 0..256 {
            map.insert(i, i, &guard);
        }
    }

    let removed = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let map = Arc::clone(&map);
            let removed = Arc::clone(&removed);
            std::thread::spawn(move || {
                let guard = map.guard();
                for i in 0..256 {
                    if let Some(v) = map.remove(&i, &guard) {
                        assert_eq!(v, &i);
                        removed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    // each key was handed to exactly one remover
    assert_eq!(removed.load(Ordering::Relaxed), 256);
    assert!(map.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn reads_during_reserve() {
    let map = Arc::new(HashMap::<usize, usize>::new());
    {
        let guard = map.guard();
        for i in 0..1024 {
            map.insert(i, i, &guard);
        }
    }

    let grower = {
        let map = Arc::clone(&map);
        std::thread::spawn(move || {
            let guard = map.guard();
            for power in 11..16 {
                map.try_reserve(1 << power, &guard).unwrap();
            }
        })
    };
    let reader = {
        let map = Arc::clone(&map);
        std::thread::spawn(move || {
            let guard = map.guard();
            for _ in 0..32 {
                for i in 0..1024 {
                    assert_eq!(map.get(&i, &guard), Some(&i));
                }
            }
        })
    };
    grower.join().unwrap();
    reader.join().unwrap();

    let guard = map.guard();
    assert!(map.capacity(&guard) >= 1 << 15);
    assert_eq!(map.len(), 1024);
}

#[test]
#[cfg_attr(miri, ignore)]
fn helpers_can_leave_early() {
    let map = Arc::new(HashMap::<usize, usize>::new());
    {
        let guard = map.guard();
        for i in 0..10_000 {
            map.insert(i, i, &guard);
        }
    }

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let map = Arc::clone(&map);
            std::thread::spawn(move || {
                let guard = map.guard();
                for i in 0..1000 {
                    let key = 10_000 + t * 1000 + i;
                    map.insert(key, key, &guard);
                    // take small bites out of whatever resize is running
                    map.help_resize(1, &guard);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let guard = map.guard();
    while map.help_resize(usize::MAX, &guard) {}
    assert_eq!(map.len(), 14_000);
    for i in 0..14_000 {
        assert_eq!(map.get(&i, &guard), Some(&i));
    }
}

#[test]
fn dropping_the_map_drops_entries() {
    let key = Arc::new(0);
    let value = Arc::new(0);
    let replaced = Arc::new(1);

    let map = HashMap::<Arc<usize>, Arc<usize>>::new();
    {
        let guard = map.guard();
        map.insert(Arc::clone(&key), Arc::clone(&replaced), &guard);
        map.insert(Arc::clone(&key), Arc::clone(&value), &guard);
    }
    assert_eq!(Arc::strong_count(&value), 2);

    drop(map);
    assert_eq!(Arc::strong_count(&key), 1);
    assert_eq!(Arc::strong_count(&value), 1);
    assert_eq!(Arc::strong_count(&replaced), 1);
}

#[test]
fn equality_and_clone() {
    let a = HashMap::<usize, usize>::new();
    let b = HashMap::<usize, usize>::with_capacity(1000);
    assert_eq!(a, b);

    a.pin().insert(1, 0);
    assert_ne!(a, b);
    b.pin().insert(1, 1);
    assert_ne!(a, b);
    b.pin().insert(1, 0);
    assert_eq!(a, b);
    b.pin().insert(2, 0);
    assert_ne!(b, a);

    let c = b.clone();
    assert_eq!(b, c);
    assert_eq!(c.config(), b.config());
    // the clone has tables of its own
    c.pin().insert(3, 0);
    assert_ne!(b, c);
    assert_eq!(b.len(), 2);
}

#[test]
fn debug() {
    let map: HashMap<usize, usize> = HashMap::default();
    let guard = map.guard();
    map.insert(42, 0, &guard);
    map.insert(16, 8, &guard);

    let formatted = format!("{:?}", map);
    assert!(formatted == "{42: 0, 16: 8}" || formatted == "{16: 8, 42: 0}");
}

#[test]
fn extend_and_collect() {
    let mut entries = vec![(42, 0), (16, 6), (38, 42)];
    entries.sort_unstable();

    let map: HashMap<usize, usize> = HashMap::new();
    (&map).extend(entries.iter().copied());
    (&map).extend(entries.iter().map(|(k, v)| (k, v)));
    assert_eq!(map.len(), 3);

    let collected = HashMap::<usize, usize>::from_iter(entries.iter().map(|(k, v)| (k, v)));
    assert_eq!(map, collected);

    let guard = map.guard();
    let mut seen: Vec<_> = map.iter(&guard).map(|(k, v)| (*k, *v)).collect();
    seen.sort_unstable();
    assert_eq!(seen, entries);

    let empty = HashMap::<usize, usize>::from_iter(Vec::<(usize, usize)>::new());
    assert!(empty.is_empty());
}
