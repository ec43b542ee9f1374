//! # vsmap Facade and Range-Scan Tests
//!
//! The ordered engine shares the common contract with tree3 and adds the
//! range families. Every scan must yield keys in strictly ascending
//! lexicographic order with strict bounds on both sides.

use nvkv::{open, Engine, EngineConfig, KvError};
use tempfile::tempdir;

fn vsmap(dir: &tempfile::TempDir) -> Box<dyn Engine> {
    open(&EngineConfig::new("vsmap", dir.path().join("kv.pool"))).unwrap()
}

fn seeded(dir: &tempfile::TempDir) -> Box<dyn Engine> {
    let mut kv = vsmap(dir);
    for (key, value) in [
        (b"apple".as_slice(), b"1".as_slice()),
        (b"banana", b"2"),
        (b"cherry", b"3"),
        (b"date", b"4"),
        (b"elderberry", b"5"),
    ] {
        kv.put(key, value).unwrap();
    }
    kv
}

fn collect_keys(f: impl FnOnce(&mut dyn FnMut(&[u8]))) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    f(&mut |k| keys.push(k.to_vec()));
    keys
}

#[test]
fn common_contract_holds() {
    let dir = tempdir().unwrap();
    let mut kv = vsmap(&dir);

    assert_eq!(kv.count().unwrap(), 0);
    kv.put(b"key1", b"value1").unwrap();
    assert_eq!(kv.count().unwrap(), 1);

    let mut value = None;
    kv.get(b"key1", &mut |v| value = Some(v.to_vec())).unwrap();
    assert_eq!(value, Some(b"value1".to_vec()));

    kv.remove(b"key1").unwrap();
    assert!(matches!(kv.remove(b"key1"), Err(KvError::NotFound)));
    assert_eq!(kv.count().unwrap(), 0);
}

#[test]
fn binary_and_empty_keys_roundtrip() {
    let dir = tempdir().unwrap();
    let mut kv = vsmap(&dir);

    kv.put(b"a", b"plain").unwrap();
    kv.put(b"a\0b", b"nul").unwrap();
    kv.put(b"", b"empty").unwrap();

    assert_eq!(kv.count().unwrap(), 3);
    assert!(kv.exists(b"a\0b").unwrap());

    // The empty key sorts first, the NUL extension right after its prefix.
    let mut keys = Vec::new();
    kv.all(&mut |k| keys.push(k.to_vec())).unwrap();
    assert_eq!(keys, vec![b"".to_vec(), b"a".to_vec(), b"a\0b".to_vec()]);
}

#[test]
fn all_above_is_strict_and_ascending() {
    let dir = tempdir().unwrap();
    let kv = seeded(&dir);

    let keys = collect_keys(|f| kv.all_above(b"banana", f).unwrap());
    assert_eq!(
        keys,
        vec![b"cherry".to_vec(), b"date".to_vec(), b"elderberry".to_vec()]
    );

    // A bound between stored keys behaves the same way.
    let keys = collect_keys(|f| kv.all_above(b"coconut", f).unwrap());
    assert_eq!(keys, vec![b"date".to_vec(), b"elderberry".to_vec()]);

    assert_eq!(kv.count_above(b"banana").unwrap(), 3);
    assert_eq!(kv.count_above(b"elderberry").unwrap(), 0);
}

#[test]
fn all_below_is_strict_and_ascending() {
    let dir = tempdir().unwrap();
    let kv = seeded(&dir);

    let keys = collect_keys(|f| kv.all_below(b"cherry", f).unwrap());
    assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec()]);

    assert_eq!(kv.count_below(b"apple").unwrap(), 0);
    assert_eq!(kv.count_below(b"zzz").unwrap(), 5);
}

#[test]
fn between_excludes_both_bounds() {
    let dir = tempdir().unwrap();
    let kv = seeded(&dir);

    let keys = collect_keys(|f| kv.all_between(b"apple", b"date", f).unwrap());
    assert_eq!(keys, vec![b"banana".to_vec(), b"cherry".to_vec()]);

    assert_eq!(kv.count_between(b"apple", b"date").unwrap(), 2);
    assert_eq!(kv.count_between(b"apple", b"apple").unwrap(), 0);
    assert_eq!(kv.count_between(b"date", b"apple").unwrap(), 0);

    let keys = collect_keys(|f| kv.all_between(b"date", b"apple", f).unwrap());
    assert!(keys.is_empty());
}

#[test]
fn each_variants_deliver_values_in_order() {
    let dir = tempdir().unwrap();
    let kv = seeded(&dir);

    let mut pairs = Vec::new();
    kv.each_above(b"banana", &mut |k, v| pairs.push((k.to_vec(), v.to_vec())))
        .unwrap();
    assert_eq!(
        pairs,
        vec![
            (b"cherry".to_vec(), b"3".to_vec()),
            (b"date".to_vec(), b"4".to_vec()),
            (b"elderberry".to_vec(), b"5".to_vec()),
        ]
    );

    let mut pairs = Vec::new();
    kv.each_between(b"apple", b"cherry", &mut |k, v| {
        pairs.push((k.to_vec(), v.to_vec()))
    })
    .unwrap();
    assert_eq!(pairs, vec![(b"banana".to_vec(), b"2".to_vec())]);

    let mut pairs = Vec::new();
    kv.each_below(b"banana", &mut |k, v| pairs.push((k.to_vec(), v.to_vec())))
        .unwrap();
    assert_eq!(pairs, vec![(b"apple".to_vec(), b"1".to_vec())]);
}

#[test]
fn overwrite_does_not_disturb_ordering() {
    let dir = tempdir().unwrap();
    let mut kv = vsmap(&dir);

    for i in (0..100u32).rev() {
        kv.put(format!("k{:03}", i).as_bytes(), b"first").unwrap();
    }
    for i in 0..100u32 {
        kv.put(
            format!("k{:03}", i).as_bytes(),
            format!("second{}", i).as_bytes(),
        )
        .unwrap();
    }

    assert_eq!(kv.count().unwrap(), 100);
    let keys = collect_keys(|f| kv.all(f).unwrap());
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);

    let mut value = None;
    kv.get(b"k042", &mut |v| value = Some(v.to_vec())).unwrap();
    assert_eq!(value, Some(b"second42".to_vec()));
}

#[test]
fn scan_over_many_entries_is_fully_ordered() {
    let dir = tempdir().unwrap();
    let mut kv = vsmap(&dir);

    for i in 0..5000u32 {
        // 7919 is coprime with 5000, so this visits every key exactly once
        // in an order unrelated to the sort order.
        let scrambled = (i * 7919) % 5000;
        kv.put(format!("key{:06}", scrambled).as_bytes(), b"v").unwrap();
    }

    let keys = collect_keys(|f| kv.all(f).unwrap());
    assert_eq!(keys.len(), 5000);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}
