use gust::{Config, Error, LocalHashMap};
use std::sync::Arc;

mod common;
use common::ZeroHashBuilder;

#[test]
fn new() {
    let map = LocalHashMap::<usize, usize>::new();
    assert!(map.is_empty());
    assert_eq!(map.capacity(), 16);
    assert_eq!(map.load_factor(), 0.75);
}

#[test]
fn insert_get_remove() {
    let mut map = LocalHashMap::new();
    assert_eq!(map.insert("a", 1), None);
    assert_eq!(map.insert("b", 2), None);
    assert_eq!(map.insert("a", 3), Some(1));
    assert_eq!(map.len(), 2);
    assert_eq!(map.get("a"), Some(&3));
    assert_eq!(map.get_key_value("b"), Some((&"b", &2)));
    assert_eq!(map.remove("a"), Some(3));
    assert_eq!(map.remove("a"), None);
    assert_eq!(map.len(), 1);
    assert!(map.contains_key("b"));
}

#[test]
fn one_bucket() {
    let mut map = LocalHashMap::<&'static str, usize, _>::with_hasher(ZeroHashBuilder);

    map.insert("head", 0);
    map.insert("middle", 10);
    map.insert("tail", 100);
    assert_eq!(map.insert("head", 1), Some(0));
    assert_eq!(map.insert("middle", 11), Some(10));
    assert_eq!(map.insert("tail", 101), Some(100));
    assert_eq!(map.get("middle"), Some(&11));

    // remove in an order that hits the middle, the tail, and the head of the bin
    assert_eq!(map.remove("middle"), Some(11));
    assert_eq!(map.remove("tail"), Some(101));
    assert_eq!(map.remove("head"), Some(1));
    assert!(map.is_empty());
}

#[test]
fn capacity_is_smallest_fitting_power_of_two() {
    let mut map = LocalHashMap::new();
    for n in 1..=5000usize {
        map.insert(n, n * 2);
        let capacity = map.capacity();
        assert!(capacity.is_power_of_two());
        assert!(n as f32 <= capacity as f32 * 0.75);
        assert!(capacity == 16 || n as f32 > (capacity / 2) as f32 * 0.75);
    }
    for n in 1..=5000usize {
        assert_eq!(map.get(&n), Some(&(n * 2)));
    }
}

#[test]
fn colliding_keys_stay_reachable() {
    let mut map = LocalHashMap::<u64, u64, _>::with_config_and_hasher(
        Config::default().initial_capacity(64),
        ZeroHashBuilder,
    )
    .unwrap();
    for k in 0..500 {
        map.insert(k, k + 1);
    }
    for k in 0..500 {
        assert_eq!(map.get(&k), Some(&(k + 1)));
    }
    for k in (0..500).filter(|k| k % 3 == 0) {
        assert_eq!(map.remove(&k), Some(k + 1));
    }
    for k in 0..500 {
        assert_eq!(map.contains_key(&k), k % 3 != 0);
    }
}

#[test]
fn rejects_bad_configs() {
    assert!(matches!(
        LocalHashMap::<u8, u8>::with_capacity_and_load_factor(16, -1.0),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        LocalHashMap::<u8, u8>::with_config(Config::default().initial_capacity(1 << 31)),
        Err(Error::Validation(_))
    ));
}

#[test]
fn high_load_factor() {
    let mut map = LocalHashMap::with_capacity_and_load_factor(64, 4.0).unwrap();
    for i in 0..256 {
        map.insert(i, i);
    }
    assert_eq!(map.capacity(), 64);
    map.insert(256, 256);
    assert_eq!(map.capacity(), 128);
}

#[test]
fn cursor_reports_removal() {
    let mut map = LocalHashMap::new();
    map.insert(1, "one");
    map.insert(2, "two");
    map.insert(3, "three");

    let mut cursor = map.cursor();
    let first = cursor.next(&map).unwrap().map(|(k, _)| *k).unwrap();
    let other = if first == 1 { 2 } else { 1 };
    map.remove(&other);

    assert_eq!(cursor.next(&map), Some(Err(Error::ConcurrentStructuralChange)));
    assert_eq!(cursor.next(&map), None);
}

#[test]
fn cursor_tolerates_its_own_removals() {
    let mut map: LocalHashMap<u32, u32> = (0..1000).map(|i| (i, i)).collect();
    let mut cursor = map.cursor();
    let mut visited = 0;
    while let Some(step) = cursor.next(&map) {
        let (&k, _) = step.unwrap();
        visited += 1;
        if k % 10 != 0 {
            cursor.remove(&mut map).unwrap();
        }
    }
    assert_eq!(visited, 1000);
    assert_eq!(map.len(), 100);
    assert!(map.keys().all(|k| k % 10 == 0));
}

#[test]
fn cursor_ignores_replacement_and_growth() {
    let mut map: LocalHashMap<u32, u32> = (0..10).map(|i| (i, i)).collect();
    let mut cursor = map.cursor();
    let mut seen = 0;
    while let Some(step) = cursor.next(&map) {
        let k = *step.unwrap().0;
        seen += 1;
        map.insert(k, k + 100);
        map.try_reserve(1 << seen).unwrap();
    }
    assert_eq!(seen, 10);
    assert!(map.values().all(|&v| v >= 100));
}

#[test]
fn clear_is_structural() {
    let mut map: LocalHashMap<u32, u32> = (0..10).map(|i| (i, i)).collect();
    let mut cursor = map.cursor();
    map.clear();
    assert_eq!(cursor.next(&map), Some(Err(Error::ConcurrentStructuralChange)));
}

#[test]
fn checked_insert_reports_success() {
    let mut map = LocalHashMap::new();
    for i in 0..100 {
        assert_eq!(map.checked_insert(i, i), Ok(None));
    }
    assert_eq!(map.checked_insert(5, 50), Ok(Some(5)));
    assert_eq!(map.len(), 100);
    assert_eq!(map.capacity(), 256);
}

#[test]
fn resize_by_hand() {
    let mut map: LocalHashMap<u32, u32> = (0..10).map(|i| (i, i)).collect();
    let capacity = map.capacity();
    map.resize().unwrap();
    assert_eq!(map.capacity(), capacity * 2);
    for i in 0..10 {
        assert_eq!(map[&i], i);
    }
}

#[test]
fn values_are_dropped() {
    let value = Arc::new(0);
    let mut map = LocalHashMap::new();
    map.insert(1, value.clone());
    map.insert(2, value.clone());
    assert_eq!(Arc::strong_count(&value), 3);
    map.insert(1, value.clone());
    assert_eq!(Arc::strong_count(&value), 3);
    map.remove(&2);
    assert_eq!(Arc::strong_count(&value), 2);
    drop(map);
    assert_eq!(Arc::strong_count(&value), 1);
}

#[test]
fn equality_ignores_order() {
    let a: LocalHashMap<u32, u32> = (0..100).map(|i| (i, i)).collect();
    let b: LocalHashMap<u32, u32> = (0..100).rev().map(|i| (i, i)).collect();
    assert_eq!(a, b);

    let mut c = b.clone();
    c.insert(0, 1);
    assert_ne!(a, c);
}

#[test]
fn debug() {
    let mut map = LocalHashMap::new();
    map.insert(42, 0);
    map.insert(16, 8);
    let formatted = format!("{:?}", map);
    assert!(formatted == "{42: 0, 16: 8}" || formatted == "{16: 8, 42: 0}");
}

#[test]
fn extend_and_iterate() {
    let mut map = LocalHashMap::new();
    map.extend(vec![(1, 10), (2, 20)]);
    map.extend([(&3, &30), (&1, &11)].iter().copied());
    assert_eq!(map.len(), 3);
    assert_eq!(map[&1], 11);

    for (_, v) in &mut map {
        *v += 1;
    }
    let mut pairs: Vec<_> = (&map).into_iter().map(|(&k, &v)| (k, v)).collect();
    pairs.sort_unstable();
    assert_eq!(pairs, [(1, 12), (2, 21), (3, 31)]);

    let mut owned: Vec<_> = map.into_iter().collect();
    owned.sort_unstable();
    assert_eq!(owned, pairs);
}

#[test]
fn retain() {
    let mut map: LocalHashMap<u32, u32> = (0..100).map(|i| (i, i)).collect();
    map.retain(|k, v| {
        *v += 1;
        k % 2 == 0
    });
    assert_eq!(map.len(), 50);
    assert_eq!(map.get(&2), Some(&3));
    assert_eq!(map.get(&3), None);
}
