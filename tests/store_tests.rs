//! End-to-end tests: empty map, large persisted maps, and corruption detection.

use exthash::{HashMap, StoreError};
use std::io::Write;

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[test]
fn test_empty_map_finds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("m");
    let map = HashMap::open(&base, false).unwrap();
    assert_eq!(map.find(fnv1a(b"anything"), b"anything"), None);
    assert_eq!(map.iter().count(), 0);
}

#[test]
fn test_single_insert_and_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("m");
    let mut map = HashMap::open(&base, false).unwrap();
    let key = b"only-key";
    let hash = fnv1a(key);
    assert_eq!(map.get(hash, key, b"only-value").unwrap(), b"only-value");
    assert_eq!(map.find(hash, key), Some(&b"only-value"[..]));
}

#[test]
fn test_persistence_across_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("m");
    let records: Vec<(Vec<u8>, Vec<u8>)> = (0..1000)
        .map(|i| (format!("record-{i}").into_bytes(), format!("payload-{i}").into_bytes()))
        .collect();

    {
        let mut map = HashMap::open(&base, false).unwrap();
        for (key, value) in &records {
            map.get(fnv1a(key), key, value).unwrap();
        }
        map.close().unwrap();
    }

    let map = HashMap::open(&base, false).unwrap();
    for (key, value) in &records {
        assert_eq!(map.find(fnv1a(key), key), Some(value.as_slice()));
    }
    assert_eq!(map.iter().count(), records.len());
}

#[test]
fn test_read_only_reopen_does_not_mutate() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("m");
    {
        let mut map = HashMap::open(&base, false).unwrap();
        map.get(fnv1a(b"k"), b"k", b"v").unwrap();
        map.close().unwrap();
    }
    let map = HashMap::open(&base, true).unwrap();
    assert_eq!(map.find(fnv1a(b"k"), b"k"), Some(&b"v"[..]));
}

#[test]
fn test_corrupt_directory_signature_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("m");
    {
        let mut map = HashMap::open(&base, false).unwrap();
        map.get(fnv1a(b"k"), b"k", b"v").unwrap();
        map.close().unwrap();
    }

    let cat_path = dir.path().join("m.cat");
    let mut bytes = std::fs::read(&cat_path).unwrap();
    bytes[0..4].copy_from_slice(&0xdead_beefu32.to_ne_bytes());
    let mut file = std::fs::File::create(&cat_path).unwrap();
    file.write_all(&bytes).unwrap();

    match HashMap::open(&base, false) {
        Err(StoreError::Corruption { which: "directory", .. }) => {}
        other => panic!("expected directory corruption error, got {:?}", other.is_ok()),
    }
}

#[test]
fn test_corrupt_data_signature_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("m");
    {
        let mut map = HashMap::open(&base, false).unwrap();
        map.get(fnv1a(b"k"), b"k", b"v").unwrap();
        map.close().unwrap();
    }

    let dat_path = dir.path().join("m.dat");
    let mut bytes = std::fs::read(&dat_path).unwrap();
    bytes[0..4].copy_from_slice(&0xdead_beefu32.to_ne_bytes());
    let mut file = std::fs::File::create(&dat_path).unwrap();
    file.write_all(&bytes).unwrap();

    match HashMap::open(&base, false) {
        Err(StoreError::Corruption { which: "data", .. }) => {}
        other => panic!("expected data corruption error, got {:?}", other.is_ok()),
    }
}
