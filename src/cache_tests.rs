//! Cross-module cache tests: load-on-demand from a real game image,
//! eviction under pressure, and the lock/touch protocol as the save layer
//! sees it.

use crate::gamebuild::GameBuilder;
use crate::hostifc::NullHost;
use crate::object;
use crate::objcache::ObjectCache;
use crate::value::Value;
use crate::vocab::VocabCtx;

use test_log::test;

fn build_game(dir: &std::path::Path, objects: u16) -> std::path::PathBuf {
    let path = dir.join("cachetest.gam");
    let mut gb = GameBuilder::new();
    for i in 0..objects {
        let num = 100 + i;
        gb.object(
            num,
            false,
            &[],
            &[
                (20, Value::Number(num as i32)),
                (21, Value::Str(vec![b'x'; 64])),
            ],
        );
    }
    gb.write_to(&path).unwrap();
    path
}

#[test]
fn demand_load_with_tiny_budget() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_game(dir.path(), 32);
    // budget fits only a couple of objects at a time
    let mut cache = ObjectCache::new(256, 4);
    let mut voc = VocabCtx::new();
    crate::gamefile::load_game(&path, &mut cache, &mut voc, &mut NullHost).unwrap();

    // sweep everything twice; each object reloads as needed and reads the
    // same value both times
    for round in 0..2 {
        for i in 0..32u16 {
            let num = 100 + i;
            let val = cache.get_prop_direct(num, 20).unwrap();
            assert_eq!(val, Some(Value::Number(num as i32)), "round {round}");
        }
    }
}

#[test]
fn dirty_objects_survive_eviction_pressure() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_game(dir.path(), 16);
    let mut cache = ObjectCache::new(512, 4);
    let mut voc = VocabCtx::new();
    crate::gamefile::load_game(&path, &mut cache, &mut voc, &mut NullHost).unwrap();

    cache.set_prop(100, 20, &Value::Number(-1)).unwrap();
    assert!(cache.is_dirty(100));

    // force traffic through the rest of the set
    for i in 1..16u16 {
        cache.get_prop_direct(100 + i, 20).unwrap();
    }

    // the modified object kept its runtime value
    assert_eq!(
        cache.get_prop_direct(100, 20).unwrap(),
        Some(Value::Number(-1))
    );
}

#[test]
fn revert_after_load_restores_file_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_game(dir.path(), 2);
    let mut cache = ObjectCache::new(1 << 20, 4);
    let mut voc = VocabCtx::new();
    crate::gamefile::load_game(&path, &mut cache, &mut voc, &mut NullHost).unwrap();

    let before = {
        let guard = cache.lock(100).unwrap();
        guard.bytes().to_vec()
    };
    cache.set_prop(100, 20, &Value::True).unwrap();
    cache.set_prop(100, 55, &Value::Str(b"extra".to_vec())).unwrap();
    cache.revert_all();
    let after = {
        let guard = cache.lock(100).unwrap();
        guard.bytes().to_vec()
    };
    assert_eq!(before, after);
}

#[test]
fn mutable_region_accounting_matches_offsets() {
    // the size invariant: free offset always equals the payload length
    let dir = tempfile::tempdir().unwrap();
    let path = build_game(dir.path(), 1);
    let mut cache = ObjectCache::new(1 << 20, 4);
    let mut voc = VocabCtx::new();
    crate::gamefile::load_game(&path, &mut cache, &mut voc, &mut NullHost).unwrap();

    for val in [
        Value::Number(7),
        Value::Str(b"abcdefgh".to_vec()),
        Value::Number(8),
        Value::List(vec![Value::True, Value::Number(1)]),
    ] {
        cache.set_prop(100, 30, &val).unwrap();
        let guard = cache.lock(100).unwrap();
        let p = guard.bytes();
        assert_eq!(object::free_ofs(p), p.len());
        assert!(object::reset_ofs(p) <= p.len());
    }
}
