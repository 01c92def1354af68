//! End-to-end scenarios against the public API only.

use hashkv_engine::{Engine, ErrorKind};

#[test]
fn scenario_a_basic_put_get() {
    let engine = Engine::initialize(16).unwrap();
    engine.put(b"k", b"v").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), b"v");
    assert_eq!(engine.stats().item_count, 1);
}

#[test]
fn scenario_b_grow_crosses_load_threshold() {
    let engine = Engine::initialize(16).unwrap();
    for i in 0..13 {
        let key = format!("k{i}");
        engine.put(key.as_bytes(), b"v").unwrap();
    }
    assert!(engine.stats().bucket_count >= 32);
    for i in 0..13 {
        let key = format!("k{i}");
        assert_eq!(engine.get(key.as_bytes()).unwrap(), b"v");
    }
}

#[test]
fn scenario_c_repeated_overwrite() {
    let engine = Engine::initialize(16).unwrap();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"a", b"22").unwrap();
    engine.put(b"a", b"333").unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"333");
    assert_eq!(engine.stats().item_count, 1);
}

#[test]
fn scenario_d_second_delete_is_not_found() {
    let engine = Engine::initialize(16).unwrap();
    engine.put(b"a", b"1").unwrap();
    engine.delete(b"a").unwrap();
    let err = engine.delete(b"a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(engine.stats().item_count, 0);
}

#[test]
fn scenario_e_tombstone_reuse_path() {
    let engine = Engine::initialize(16).unwrap();
    engine.put(b"a", b"1").unwrap();
    engine.delete(b"a").unwrap();
    engine.put(b"a", b"2").unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"2");
    assert_eq!(engine.stats().item_count, 1);
}

#[test]
fn scenario_f_shrink_crosses_load_threshold() {
    let engine = Engine::initialize(64).unwrap();
    for i in 0..64 {
        let key = format!("k{i}");
        engine.put(key.as_bytes(), b"v").unwrap();
    }
    for i in 0..60 {
        let key = format!("k{i}");
        engine.delete(key.as_bytes()).unwrap();
    }
    // Nudge migration work forward: each op only advances the cursor by
    // Engine::MIGRATE_BATCH, so touch the table a few more times than the
    // remaining bucket count to guarantee the shrink epoch finishes.
    for _ in 0..128 {
        let _ = engine.get(b"k60");
    }
    for i in 60..64 {
        let key = format!("k{i}");
        assert_eq!(engine.get(key.as_bytes()).unwrap(), b"v");
    }
    assert!(engine.stats().bucket_count <= 64);
}

#[test]
fn scenario_g_binary_safe_key_with_embedded_zeros() {
    let engine = Engine::initialize(16).unwrap();
    let key: Vec<u8> = (0u8..=0x0f).collect();
    engine.put(&key, b"x").unwrap();
    assert_eq!(engine.get(&key).unwrap(), b"x");
}
