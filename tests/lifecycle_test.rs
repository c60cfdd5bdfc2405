//! Module lifecycle tests
//!
//! Drives the manager directly against a mock boundary that registers one
//! `GET /<stem>` route per loaded module.

mod common;

use common::Harness;
use omnirouter::modules::{ModuleManager, ModuleRegistry};
use omnirouter::{CapabilityPolicy, Capabilities, create_shared_router};
use std::sync::Arc;

#[test]
fn test_create_stages_and_loads() {
    let h = Harness::new();
    let path = h.write_module("alpha.so", "alpha v1");

    h.manager.create(&path).unwrap();

    assert_eq!(h.manager.tracked(), 1);
    assert_eq!(h.manager.loaded(), 1);
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.boundary.loads(), 1);

    let staged = h.manager.staged_path(&path);
    assert_eq!(std::fs::read_to_string(&staged).unwrap(), "alpha v1");
    assert_eq!(h.get("/alpha").as_deref(), Some("alpha v1"));

    // Registry entry is renamed to what the boundary reported.
    let muid = h.manager.muid_of(&path).unwrap();
    assert_eq!(h.registry.lookup(muid).unwrap().name, "alpha");
}

#[test]
fn test_non_module_files_are_ignored() {
    let h = Harness::new();
    let path = h.write_module("notes.txt", "hello");

    h.manager.create(&path).unwrap();
    h.manager.reload(&path).unwrap();
    h.manager.remove(&path).unwrap();

    assert_eq!(h.manager.tracked(), 0);
    assert_eq!(h.boundary.loads(), 0);
    assert!(h.registry.is_empty());
}

#[test]
fn test_reload_swaps_instance() {
    let h = Harness::new();
    let path = h.write_module("alpha.so", "alpha v1");
    h.manager.create(&path).unwrap();
    let first = h.manager.muid_of(&path).unwrap();

    std::fs::write(&path, "alpha v2").unwrap();
    h.manager.reload(&path).unwrap();
    let second = h.manager.muid_of(&path).unwrap();

    assert_ne!(first, second);
    assert!(h.registry.lookup(first).is_none());
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.boundary.loads(), 2);
    assert_eq!(h.boundary.unloads(), 1);
    assert_eq!(h.get("/alpha").as_deref(), Some("alpha v2"));
    assert_eq!(
        std::fs::read_to_string(h.manager.staged_path(&path)).unwrap(),
        "alpha v2"
    );
}

#[test]
fn test_reload_without_record_creates() {
    let h = Harness::new();
    let path = h.write_module("late.so", "late");

    h.manager.reload(&path).unwrap();

    assert_eq!(h.manager.loaded(), 1);
    assert_eq!(h.get("/late").as_deref(), Some("late"));
}

#[test]
fn test_reload_of_vanished_source_removes_record() {
    let h = Harness::new();
    let path = h.write_module("gone.so", "gone");
    h.manager.create(&path).unwrap();

    std::fs::remove_file(&path).unwrap();
    h.manager.reload(&path).unwrap();

    assert_eq!(h.manager.tracked(), 0);
    assert!(h.registry.is_empty());
    assert!(h.get("/gone").is_none());
    assert!(!h.manager.staged_path(&path).exists());
}

#[test]
fn test_remove_clears_everything() {
    let h = Harness::new();
    let path = h.write_module("alpha.so", "alpha");
    h.manager.create(&path).unwrap();
    let staged = h.manager.staged_path(&path);

    h.manager.remove(&path).unwrap();

    assert_eq!(h.manager.tracked(), 0);
    assert!(h.registry.is_empty());
    assert_eq!(h.boundary.unloads(), 1);
    assert!(!staged.exists());
    assert!(h.get("/alpha").is_none());
    // The entry itself survives with empty slots.
    let table = h.router.lookup("/alpha").unwrap();
    assert!(table.is_empty());
}

#[test]
fn test_remove_untracked_is_not_an_error() {
    let h = Harness::new();
    let path = h.root().join("never.so");
    h.manager.remove(&path).unwrap();
    assert_eq!(h.boundary.unloads(), 0);
}

#[test]
fn test_failed_load_leaves_no_routes() {
    let h = Harness::new();
    h.boundary.fail("broken.so", true);
    let path = h.write_module("broken.so", "broken");

    assert!(h.manager.create(&path).is_err());

    assert_eq!(h.manager.tracked(), 1);
    assert_eq!(h.manager.loaded(), 0);
    assert!(h.registry.is_empty());
    assert!(h.get("/broken").is_none());

    // The next change retries.
    h.boundary.fail("broken.so", false);
    std::fs::write(&path, "fixed").unwrap();
    h.manager.reload(&path).unwrap();
    assert_eq!(h.manager.loaded(), 1);
    assert_eq!(h.get("/broken").as_deref(), Some("fixed"));
}

#[test]
fn test_identity_exhaustion_aborts_load() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("modules")).unwrap();
    let router = create_shared_router();
    let registry = Arc::new(ModuleRegistry::with_id_source(|| Some(0)));
    let boundary = Arc::new(common::MockBoundary::new(router.clone(), registry.clone()));
    let manager = ModuleManager::new(
        dir.path().join("modules"),
        dir.path().join("mirror"),
        registry.clone(),
        router.clone(),
        boundary.clone(),
        CapabilityPolicy::new(Capabilities::ALL),
    );

    let path = dir.path().join("modules/a.so");
    std::fs::write(&path, "a").unwrap();

    assert!(manager.create(&path).is_err());
    assert_eq!(boundary.loads(), 0);
    assert_eq!(manager.loaded(), 0);
    assert!(registry.is_empty());
}

#[test]
fn test_capability_policy_gates_registration() {
    let policy = CapabilityPolicy::new(Capabilities::LOGGING)
        .with_override("trusted.so", Capabilities::ALL);
    let h = Harness::with_policy(policy);

    let untrusted = h.write_module("untrusted.so", "u");
    let trusted = h.write_module("trusted.so", "t");
    h.manager.create(&untrusted).unwrap();
    h.manager.create(&trusted).unwrap();

    assert_eq!(h.manager.loaded(), 2);
    assert!(h.get("/untrusted").is_none());
    assert_eq!(h.get("/trusted").as_deref(), Some("t"));
}

#[test]
fn test_same_file_name_in_subdirectories() {
    let h = Harness::new();
    let a = h.write_module("one/plugin.so", "one");
    let b = h.write_module("two/plugin.so", "two");
    h.manager.create(&a).unwrap();
    h.manager.create(&b).unwrap();

    let staged_a = h.manager.staged_path(&a);
    let staged_b = h.manager.staged_path(&b);
    assert_ne!(staged_a, staged_b);
    assert_eq!(std::fs::read_to_string(staged_a).unwrap(), "one");
    assert_eq!(std::fs::read_to_string(staged_b).unwrap(), "two");
    assert_eq!(h.manager.loaded(), 2);
    assert_eq!(h.manager.tracked_under(&h.root().join("one")), vec![a]);
}

#[test]
fn test_create_twice_reloads() {
    let h = Harness::new();
    let path = h.write_module("alpha.so", "alpha");
    h.manager.create(&path).unwrap();
    h.manager.create(&path).unwrap();

    assert_eq!(h.manager.tracked(), 1);
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.boundary.loads(), 2);
    assert_eq!(h.boundary.unloads(), 1);
}

#[test]
fn test_shutdown_unloads_all() {
    let h = Harness::new();
    for name in ["a.so", "b.dylib", "c.dll"] {
        let path = h.write_module(name, name);
        h.manager.create(&path).unwrap();
    }
    assert_eq!(h.manager.loaded(), 3);

    h.manager.shutdown();

    assert_eq!(h.manager.tracked(), 0);
    assert!(h.registry.is_empty());
    assert_eq!(h.boundary.unloads(), 3);
    assert!(h.router.routes().iter().all(|r| r.method_mask == 0));
}

#[test]
fn test_concurrent_lifecycle_operations() {
    let h = Arc::new(Harness::new());
    let paths: Vec<_> = (0..8)
        .map(|i| h.write_module(&format!("m{}.so", i), &format!("m{}", i)))
        .collect();

    std::thread::scope(|s| {
        for path in &paths {
            let h = h.clone();
            s.spawn(move || {
                h.manager.create(path).unwrap();
                h.manager.reload(path).unwrap();
            });
        }
    });

    assert_eq!(h.manager.loaded(), 8);
    assert_eq!(h.registry.len(), 8);
    for i in 0..8 {
        let expected = format!("m{}", i);
        assert_eq!(h.get(&format!("/m{}", i)).as_deref(), Some(expected.as_str()));
    }
}
