use super::*;

// -------------------- Skip list --------------------

#[test]
fn skiplist_insert_and_get() {
    let mut list = SkipList::with_seed(7);
    assert!(list.insert(b"b".to_vec(), 2).is_none());
    assert!(list.insert(b"a".to_vec(), 1).is_none());
    assert!(list.insert(b"c".to_vec(), 3).is_none());

    assert_eq!(list.get(b"a"), Some(&1));
    assert_eq!(list.get(b"b"), Some(&2));
    assert_eq!(list.get(b"c"), Some(&3));
    assert_eq!(list.get(b"d"), None);
    assert_eq!(list.len(), 3);
}

#[test]
fn skiplist_insert_existing_returns_previous() {
    let mut list = SkipList::with_seed(1);
    list.insert(b"k".to_vec(), "old");
    assert_eq!(list.insert(b"k".to_vec(), "new"), Some("old"));
    assert_eq!(list.get(b"k"), Some(&"new"));
    assert_eq!(list.len(), 1);
}

#[test]
fn skiplist_iterates_in_byte_order() {
    let mut list = SkipList::with_seed(42);
    // reverse insertion plus keys that sort differently as strings vs bytes
    let keys: Vec<Vec<u8>> = vec![
        vec![0xFF],
        b"b".to_vec(),
        b"aa".to_vec(),
        b"a".to_vec(),
        vec![0x00],
        b"".to_vec(),
    ];
    for (i, k) in keys.iter().enumerate() {
        list.insert(k.clone(), i);
    }

    let got: Vec<&[u8]> = list.iter().map(|(k, _)| k).collect();
    let mut expected: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    expected.sort();
    assert_eq!(got, expected);
}

#[test]
fn skiplist_iter_is_restartable() {
    let mut list = SkipList::with_seed(3);
    for i in 0..50u32 {
        list.insert(format!("{:03}", i).into_bytes(), i);
    }
    let first: Vec<u32> = list.iter().map(|(_, v)| *v).collect();
    let second: Vec<u32> = list.iter().map(|(_, v)| *v).collect();
    assert_eq!(first, second);
    assert_eq!(first, (0..50).collect::<Vec<_>>());
}

#[test]
fn skiplist_range_from_seeks_to_first_geq() {
    let mut list = SkipList::with_seed(9);
    for k in ["apple", "banana", "cherry", "date"] {
        list.insert(k.as_bytes().to_vec(), ());
    }

    let from_b: Vec<&[u8]> = list.range_from(b"b").map(|(k, _)| k).collect();
    assert_eq!(
        from_b,
        vec![b"banana".as_slice(), b"cherry".as_slice(), b"date".as_slice()]
    );

    let exact: Vec<&[u8]> = list.range_from(b"cherry").map(|(k, _)| k).collect();
    assert_eq!(exact, vec![b"cherry".as_slice(), b"date".as_slice()]);

    assert_eq!(list.range_from(b"zzz").count(), 0);
    assert_eq!(list.range_from(b"").count(), 4);
}

#[test]
fn skiplist_height_stays_bounded() {
    let mut list = SkipList::with_seed(1234);
    for i in 0..20_000u32 {
        list.insert(i.to_be_bytes().to_vec(), i);
    }
    assert!(list.height() >= 1);
    assert!(list.height() <= skiplist::MAX_HEIGHT);
    // 20k entries with p = 1/2 should comfortably grow past a single level
    assert!(list.height() > 4, "height {} suspiciously low", list.height());
}

#[test]
fn skiplist_random_inserts_match_btreemap() {
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    let mut list = SkipList::with_seed(5);
    let mut model = BTreeMap::new();

    for i in 0..5_000u32 {
        let key = rng.gen_range(0u32..1_000).to_be_bytes().to_vec();
        list.insert(key.clone(), i);
        model.insert(key, i);
    }

    assert_eq!(list.len(), model.len());
    let got: Vec<(Vec<u8>, u32)> = list.iter().map(|(k, v)| (k.to_vec(), *v)).collect();
    let want: Vec<(Vec<u8>, u32)> = model.into_iter().collect();
    assert_eq!(got, want);
}

#[test]
fn skiplist_towers_share_one_link_arena() {
    let mut list = SkipList::with_seed(42);
    for i in 0..1_000u32 {
        list.insert(i.to_be_bytes().to_vec(), i);
    }
    let links = list.link_count();
    assert!(links >= 1_000 && links <= 1_000 * skiplist::MAX_HEIGHT);

    // overwrites reuse the existing tower
    for i in 0..1_000u32 {
        list.insert(i.to_be_bytes().to_vec(), i + 1);
    }
    assert_eq!(list.link_count(), links);
    assert_eq!(list.get(&999u32.to_be_bytes()), Some(&1_000));
    let keys: Vec<u32> = list.range_from(&500u32.to_be_bytes()).map(|(_, v)| *v - 1).collect();
    assert_eq!(keys, (500..1_000).collect::<Vec<_>>());
}

#[test]
fn skiplist_get_mut_updates_in_place() {
    let mut list = SkipList::with_seed(0);
    list.insert(b"k".to_vec(), 1u64);
    *list.get_mut(b"k").unwrap() += 10;
    assert_eq!(list.get(b"k"), Some(&11));
    assert!(list.get_mut(b"missing").is_none());
}

// -------------------- Memtable put / get / delete --------------------

#[test]
fn put_and_get_single_key() {
    let mut m = Memtable::new();
    m.put(b"k1".to_vec(), b"v1".to_vec(), 1);
    assert_eq!(m.len(), 1);
    let (seq, val) = m.get(b"k1").unwrap();
    assert_eq!(seq, 1);
    assert_eq!(val, b"v1");
}

#[test]
fn put_overwrites_with_newer_seq() {
    let mut m = Memtable::new();
    m.put(b"k1".to_vec(), b"v1".to_vec(), 1);
    m.put(b"k1".to_vec(), b"v2".to_vec(), 2);
    assert_eq!(m.get(b"k1").unwrap(), (2, b"v2".to_vec()));
    assert_eq!(m.len(), 1);
}

#[test]
fn put_ignores_stale_and_equal_seq() {
    let mut m = Memtable::new();
    m.put(b"k".to_vec(), b"newest".to_vec(), 5);
    m.put(b"k".to_vec(), b"stale".to_vec(), 3);
    m.put(b"k".to_vec(), b"same-seq".to_vec(), 5);
    assert_eq!(m.get(b"k").unwrap().1, b"newest");
}

#[test]
fn get_missing_key_returns_none() {
    let m = Memtable::new();
    assert!(m.get(b"nonexistent").is_none());
    assert!(m.get_entry(b"nonexistent").is_none());
}

#[test]
fn delete_leaves_tombstone_entry() {
    let mut m = Memtable::new();
    m.put(b"k1".to_vec(), b"v1".to_vec(), 1);
    m.delete(b"k1".to_vec(), 2);

    assert!(m.get(b"k1").is_none());
    assert!(m.contains_key(b"k1"));
    let entry = m.get_entry(b"k1").unwrap();
    assert_eq!(entry.seq, 2);
    assert!(entry.is_tombstone());
    assert_eq!(m.tombstone_count(), 1);
}

#[test]
fn delete_with_stale_seq_ignored() {
    let mut m = Memtable::new();
    m.put(b"k1".to_vec(), b"v1".to_vec(), 5);
    m.delete(b"k1".to_vec(), 3);
    assert_eq!(m.get(b"k1").unwrap().1, b"v1");
}

#[test]
fn put_after_delete_resurrects_only_with_higher_seq() {
    let mut m = Memtable::new();
    m.put(b"k".to_vec(), b"v1".to_vec(), 1);
    m.delete(b"k".to_vec(), 4);

    m.put(b"k".to_vec(), b"too-old".to_vec(), 3);
    assert!(m.get(b"k").is_none());

    m.put(b"k".to_vec(), b"v2".to_vec(), 5);
    assert_eq!(m.get(b"k").unwrap().1, b"v2");
}

#[test]
fn alternating_put_delete_keeps_one_slot() {
    let mut m = Memtable::new();
    for i in 0..1_000u64 {
        let seq = i * 2 + 1;
        m.put(b"k".to_vec(), b"v".to_vec(), seq);
        m.delete(b"k".to_vec(), seq + 1);
    }
    assert!(m.get(b"k").is_none());
    assert_eq!(m.len(), 1);
}

// -------------------- Iteration --------------------

#[test]
fn iter_yields_sorted_entries_with_tombstones() {
    let mut m = Memtable::with_seed(11);
    m.put(b"c".to_vec(), b"3".to_vec(), 3);
    m.delete(b"b".to_vec(), 2);
    m.put(b"a".to_vec(), b"1".to_vec(), 1);

    let entries: Vec<(&[u8], &ValueEntry)> = m.iter().collect();
    let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    assert!(entries[1].1.is_tombstone());
    assert_eq!(entries[2].1.value.as_deref(), Some(b"3".as_slice()));
}

#[test]
fn range_from_starts_at_prefix() {
    let mut m = Memtable::new();
    for (i, k) in ["user:1", "user:2", "order:1", "zeta"].iter().enumerate() {
        m.put(k.as_bytes().to_vec(), b"v".to_vec(), i as u64 + 1);
    }

    let keys: Vec<&[u8]> = m
        .range_from(b"user:")
        .map(|(k, _)| k)
        .take_while(|k| k.starts_with(b"user:"))
        .collect();
    assert_eq!(keys, vec![b"user:1".as_slice(), b"user:2".as_slice()]);
}

#[test]
fn iter_empty_memtable() {
    let m = Memtable::default();
    assert!(m.is_empty());
    assert_eq!(m.iter().count(), 0);
    assert_eq!(m.range_from(b"a").count(), 0);
}

#[test]
fn many_distinct_keys_iterate_sorted() {
    let mut m = Memtable::new();
    // insert in a scrambled order
    for i in 0u64..1000 {
        let n = (i * 7919) % 1000;
        m.put(format!("key{:04}", n).into_bytes(), b"v".to_vec(), i + 1);
    }
    assert_eq!(m.len(), 1000);
    let keys: Vec<&[u8]> = m.iter().map(|(k, _)| k).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

// -------------------- approx_size --------------------

#[test]
fn approx_size_counts_key_and_value() {
    let mut m = Memtable::new();
    assert_eq!(m.approx_size(), 0);
    m.put(b"ab".to_vec(), b"ccc".to_vec(), 1);
    assert_eq!(m.approx_size(), 5);
    m.put(b"d".to_vec(), b"ee".to_vec(), 2);
    assert_eq!(m.approx_size(), 8);
}

#[test]
fn approx_size_tracks_overwrite_and_delete() {
    let mut m = Memtable::new();
    m.put(b"a".to_vec(), b"aaa".to_vec(), 1); // 1 + 3
    assert_eq!(m.approx_size(), 4);
    m.put(b"a".to_vec(), b"bb".to_vec(), 2); // 1 + 2
    assert_eq!(m.approx_size(), 3);
    m.delete(b"a".to_vec(), 3); // key only
    assert_eq!(m.approx_size(), 1);
    m.delete(b"fresh".to_vec(), 4);
    assert_eq!(m.approx_size(), 6);
}

#[test]
fn approx_size_unchanged_by_stale_write() {
    let mut m = Memtable::new();
    m.put(b"k".to_vec(), b"v".to_vec(), 5);
    let before = m.approx_size();
    m.put(b"k".to_vec(), b"vvvv".to_vec(), 3);
    assert_eq!(m.approx_size(), before);
}

// -------------------- Edge cases --------------------

#[test]
fn binary_and_empty_payloads() {
    let mut m = Memtable::new();
    let key = vec![0x00, 0xFF, 0x80, 0x01];
    m.put(key.clone(), vec![0xDE, 0xAD], 1);
    m.put(b"empty".to_vec(), Vec::new(), 2);

    assert_eq!(m.get(&key).unwrap().1, vec![0xDE, 0xAD]);
    assert!(m.get(b"empty").unwrap().1.is_empty());
}

#[test]
fn seq_extremes() {
    let mut m = Memtable::new();
    m.put(b"zero".to_vec(), b"v".to_vec(), 0);
    m.put(b"max".to_vec(), b"v".to_vec(), u64::MAX);
    assert_eq!(m.get(b"zero").unwrap().0, 0);
    assert_eq!(m.get(b"max").unwrap().0, u64::MAX);
}

#[test]
fn write_load_with_key_reuse() {
    let mut m = Memtable::new();
    for seq in 1..=100_000u64 {
        let key = format!("key{}", seq % 1_000).into_bytes();
        m.put(key, vec![b'x'; 50], seq);
    }
    assert_eq!(m.len(), 1_000);
    assert_eq!(m.approx_size(), m.iter().map(|(k, _)| k.len() + 50).sum::<usize>());
}
