//! # tree3 Facade Tests
//!
//! End-to-end scenarios through the engine dispatch layer: basic CRUD,
//! overwrites at different value sizes, binary-safe keys, empty keys and
//! values, and scan completeness.

use nvkv::{open, Engine, EngineConfig, KvError};
use tempfile::tempdir;

fn tree3(dir: &tempfile::TempDir) -> Box<dyn Engine> {
    open(&EngineConfig::new("tree3", dir.path().join("kv.pool"))).unwrap()
}

fn get_vec(kv: &dyn Engine, key: &[u8]) -> Option<Vec<u8>> {
    let mut out = None;
    match kv.get(key, &mut |v| out = Some(v.to_vec())) {
        Ok(()) => out,
        Err(KvError::NotFound) => None,
        Err(e) => panic!("get failed: {}", e),
    }
}

#[test]
fn empty_then_put_then_get() {
    let dir = tempdir().unwrap();
    let mut kv = tree3(&dir);

    assert_eq!(kv.count().unwrap(), 0);
    kv.put(b"key1", b"value1").unwrap();
    assert_eq!(kv.count().unwrap(), 1);
    assert_eq!(get_vec(kv.as_ref(), b"key1"), Some(b"value1".to_vec()));
}

#[test]
fn overwrite_with_three_sizes() {
    let dir = tempdir().unwrap();
    let mut kv = tree3(&dir);

    kv.put(b"key1", b"value1").unwrap();

    // Same size, longer, then shorter; the count never moves.
    for value in [b"VALUE1".as_slice(), b"new_value", b"?"] {
        kv.put(b"key1", value).unwrap();
        assert_eq!(kv.count().unwrap(), 1);
        assert_eq!(get_vec(kv.as_ref(), b"key1"), Some(value.to_vec()));
    }
}

#[test]
fn binary_keys_are_not_their_prefixes() {
    let dir = tempdir().unwrap();
    let mut kv = tree3(&dir);

    kv.put(b"a", b"should_not_change").unwrap();
    kv.put(b"a\0b", b"stuff").unwrap();

    assert_eq!(kv.count().unwrap(), 2);
    assert_eq!(get_vec(kv.as_ref(), b"a"), Some(b"should_not_change".to_vec()));
    assert_eq!(get_vec(kv.as_ref(), b"a\0b"), Some(b"stuff".to_vec()));

    kv.remove(b"a\0b").unwrap();
    assert_eq!(kv.count().unwrap(), 1);
    assert_eq!(get_vec(kv.as_ref(), b"a"), Some(b"should_not_change".to_vec()));
    assert_eq!(get_vec(kv.as_ref(), b"a\0b"), None);
}

#[test]
fn empty_key_and_empty_value_roundtrip() {
    let dir = tempdir().unwrap();
    let mut kv = tree3(&dir);

    kv.put(b"", b"for-empty-key").unwrap();
    kv.put(b"empty-value-key", b"").unwrap();

    assert!(kv.exists(b"").unwrap());
    assert_eq!(get_vec(kv.as_ref(), b""), Some(b"for-empty-key".to_vec()));
    assert_eq!(get_vec(kv.as_ref(), b"empty-value-key"), Some(Vec::new()));
    assert_eq!(kv.count().unwrap(), 2);
}

#[test]
fn exists_tracks_put_and_remove() {
    let dir = tempdir().unwrap();
    let mut kv = tree3(&dir);

    assert!(!kv.exists(b"k").unwrap());
    kv.put(b"k", b"v").unwrap();
    assert!(kv.exists(b"k").unwrap());
    kv.remove(b"k").unwrap();
    assert!(!kv.exists(b"k").unwrap());
}

#[test]
fn count_matches_distinct_keys_put() {
    let dir = tempdir().unwrap();
    let mut kv = tree3(&dir);

    for i in 0..300u32 {
        kv.put(format!("key{}", i).as_bytes(), b"v").unwrap();
    }
    // Overwrites of existing keys change nothing.
    for i in 0..100u32 {
        kv.put(format!("key{}", i).as_bytes(), b"w").unwrap();
    }
    assert_eq!(kv.count().unwrap(), 300);
}

#[test]
fn scan_callbacks_cover_every_entry_exactly_once() {
    let dir = tempdir().unwrap();
    let mut kv = tree3(&dir);

    kv.put(b"2", b"1").unwrap();
    kv.put("\u{8a18}!".as_bytes(), b"RR").unwrap();

    let mut buffer = String::new();
    kv.all(&mut |key| {
        buffer.push('<');
        buffer.push_str(std::str::from_utf8(key).unwrap());
        buffer.push_str(">,");
    })
    .unwrap();

    assert!(buffer.contains("<2>,"));
    assert!(buffer.contains("<\u{8a18}!>,"));
    assert_eq!(buffer.matches(',').count(), 2);

    let mut pairs = Vec::new();
    kv.each(&mut |k, v| pairs.push((k.to_vec(), v.to_vec())))
        .unwrap();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            (b"2".to_vec(), b"1".to_vec()),
            ("\u{8a18}!".as_bytes().to_vec(), b"RR".to_vec()),
        ]
    );
}

#[test]
fn removes_across_leaf_splits() {
    let dir = tempdir().unwrap();
    let mut kv = tree3(&dir);

    for i in 0..600u32 {
        kv.put(format!("key{:04}", i).as_bytes(), format!("v{}", i).as_bytes())
            .unwrap();
    }
    for i in (0..600u32).step_by(2) {
        kv.remove(format!("key{:04}", i).as_bytes()).unwrap();
    }

    assert_eq!(kv.count().unwrap(), 300);
    for i in 0..600u32 {
        let key = format!("key{:04}", i);
        let present = kv.exists(key.as_bytes()).unwrap();
        assert_eq!(present, i % 2 == 1, "wrong presence for {}", key);
    }
}

#[test]
fn range_operations_are_not_supported() {
    let dir = tempdir().unwrap();
    let kv = tree3(&dir);

    assert!(matches!(
        kv.all_above(b"a", &mut |_| {}),
        Err(KvError::NotSupported(_))
    ));
    assert!(matches!(
        kv.each_between(b"a", b"z", &mut |_, _| {}),
        Err(KvError::NotSupported(_))
    ));
    assert!(matches!(kv.count_below(b"m"), Err(KvError::NotSupported(_))));
}
