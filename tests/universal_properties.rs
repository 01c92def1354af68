//! Universal properties from the public contract (§8, properties 1-10),
//! exercised through the public API only.

use hashkv_engine::{siphash24, Engine, ErrorKind};

#[test]
fn round_trip_any_nonempty_key_and_value() {
    let engine = Engine::initialize(16).unwrap();
    engine.put(b"round-trip", b"value-bytes").unwrap();
    assert_eq!(engine.get(b"round-trip").unwrap(), b"value-bytes");
}

#[test]
fn idempotent_delete() {
    let engine = Engine::initialize(16).unwrap();
    engine.put(b"k", b"v").unwrap();
    engine.delete(b"k").unwrap();
    assert_eq!(engine.delete(b"k").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn overwrite_semantics_leave_item_count_unchanged() {
    let engine = Engine::initialize(16).unwrap();
    engine.put(b"k", b"v1").unwrap();
    let after_first = engine.stats().item_count;
    engine.put(b"k", b"v2").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), b"v2");
    assert_eq!(engine.stats().item_count, after_first);
}

#[test]
fn count_consistency_across_put_and_delete() {
    let engine = Engine::initialize(16).unwrap();
    for i in 0..10 {
        engine.put(format!("k{i}").as_bytes(), b"v").unwrap();
    }
    for i in 0..4 {
        engine.delete(format!("k{i}").as_bytes()).unwrap();
    }
    assert_eq!(engine.stats().item_count, 6);
}

#[test]
fn probe_chain_equivalence_under_tombstones() {
    let engine = Engine::initialize(16).unwrap();
    engine.put(b"k", b"v1").unwrap();
    engine.delete(b"k").unwrap();
    engine.put(b"k", b"v2").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), b"v2");
}

#[test]
fn resize_preserves_state_across_a_grow() {
    let engine = Engine::initialize(16).unwrap();
    let mut expected = Vec::new();
    for i in 0..40 {
        let key = format!("key-{i}");
        let value = format!("value-{i}");
        engine.put(key.as_bytes(), value.as_bytes()).unwrap();
        expected.push((key, value));
    }
    assert!(engine.stats().bucket_count > 16);
    for (key, value) in &expected {
        assert_eq!(engine.get(key.as_bytes()).unwrap(), value.as_bytes());
    }
}

#[test]
fn shrink_preserves_state_for_non_deleted_keys() {
    let engine = Engine::initialize(128).unwrap();
    for i in 0..100 {
        engine.put(format!("k{i}").as_bytes(), b"v").unwrap();
    }
    for i in 0..95 {
        engine.delete(format!("k{i}").as_bytes()).unwrap();
    }
    for _ in 0..256 {
        let _ = engine.get(b"k95");
    }
    for i in 95..100 {
        assert_eq!(engine.get(format!("k{i}").as_bytes()).unwrap(), b"v");
    }
}

#[test]
fn insertion_order_independence() {
    let forward = Engine::initialize(16).unwrap();
    let backward = Engine::initialize(16).unwrap();
    let keys: Vec<String> = (0..20).map(|i| format!("k{i}")).collect();

    for key in &keys {
        forward.put(key.as_bytes(), b"v").unwrap();
    }
    for key in keys.iter().rev() {
        backward.put(key.as_bytes(), b"v").unwrap();
    }

    for key in &keys {
        assert_eq!(
            forward.get(key.as_bytes()).unwrap(),
            backward.get(key.as_bytes()).unwrap()
        );
    }
}

#[test]
fn binary_safety_for_all_byte_values() {
    let engine = Engine::initialize(16).unwrap();
    let key: Vec<u8> = (0u8..=255).collect();
    let value: Vec<u8> = (0u8..=255).rev().collect();
    engine.put(&key, &value).unwrap();
    assert_eq!(engine.get(&key).unwrap(), value);
}

#[test]
fn siphash_matches_published_reference_vectors() {
    let k0 = 0x0706050403020100u64;
    let k1 = 0x0f0e0d0c0b0a0908u64;
    let vectors: [u64; 3] = [
        0x726fdb47dd0e0e31,
        0x74f839c593dc67fd,
        0x0d6c8009d9a94f5a,
    ];
    for (i, &expected) in vectors.iter().enumerate() {
        let message: Vec<u8> = (0..i as u8).collect();
        assert_eq!(siphash24(k0, k1, &message), expected);
    }
}
