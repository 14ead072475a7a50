use bytes::Bytes;
use opaldb::core::storage::ConcurrentDict;
use std::collections::HashSet;

fn key(name: &str) -> Bytes {
    Bytes::copy_from_slice(name.as_bytes())
}

#[test]
fn test_insert_get_remove_and_size() {
    let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
    assert!(dict.is_empty());
    assert_eq!(dict.insert(key("a"), 1), None);
    assert_eq!(dict.insert(key("a"), 2), Some(1));
    assert_eq!(dict.len(), 1);
    assert_eq!(dict.get(b"a"), Some(2));
    assert_eq!(dict.remove(b"a"), Some(2));
    assert_eq!(dict.remove(b"a"), None);
    assert!(dict.is_empty());
}

#[test]
fn test_insert_if_absent_and_if_exists() {
    let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
    assert!(dict.insert_if_absent(key("a"), 1));
    assert!(!dict.insert_if_absent(key("a"), 2));
    assert_eq!(dict.get(b"a"), Some(1));

    assert!(dict.insert_if_exists(key("a"), 3));
    assert!(!dict.insert_if_exists(key("missing"), 4));
    assert_eq!(dict.get(b"a"), Some(3));
    assert_eq!(dict.len(), 1);
}

#[test]
fn test_size_equals_sum_of_entries() {
    let dict: ConcurrentDict<usize> = ConcurrentDict::new(4);
    for i in 0..500 {
        dict.insert(key(&format!("key:{i}")), i);
    }
    assert_eq!(dict.len(), 500);
    let mut walked = 0;
    dict.for_each(|_, _| {
        walked += 1;
        true
    });
    assert_eq!(walked, 500);
}

#[test]
fn test_random_keys_with_replacement() {
    let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
    for i in 0..10 {
        dict.insert(key(&format!("k{i}")), i);
    }
    let sampled = dict.random_keys(25);
    assert_eq!(sampled.len(), 25);
    for k in &sampled {
        assert!(dict.contains_key(k));
    }
}

#[test]
fn test_random_distinct_keys_terminates_and_is_distinct() {
    let dict: ConcurrentDict<u32> = ConcurrentDict::new(64);
    for i in 0..20 {
        dict.insert(key(&format!("k{i}")), i);
    }
    let sampled = dict.random_distinct_keys(5);
    assert_eq!(sampled.len(), 5);
    let unique: HashSet<_> = sampled.iter().collect();
    assert_eq!(unique.len(), 5);

    // Asking for at least the full population returns every key.
    let all = dict.random_distinct_keys(50);
    assert_eq!(all.len(), 20);
}

#[test]
fn test_random_keys_on_empty_dict() {
    let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
    assert!(dict.random_keys(3).is_empty());
    assert!(dict.random_distinct_keys(3).is_empty());
}

#[test]
fn test_update_in_place_and_upsert() {
    let dict: ConcurrentDict<Vec<u32>> = ConcurrentDict::new(16);
    assert!(dict.update(b"list", |v| v.push(1)).is_none());
    dict.upsert(key("list"), Vec::new, |v| v.push(1));
    dict.upsert(key("list"), Vec::new, |v| v.push(2));
    assert_eq!(dict.get(b"list"), Some(vec![1, 2]));
    assert_eq!(dict.len(), 1);
}

#[test]
fn test_clear_resets_size() {
    let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
    for i in 0..32 {
        dict.insert(key(&format!("k{i}")), i);
    }
    dict.clear();
    assert_eq!(dict.len(), 0);
    assert!(dict.keys().is_empty());
}
