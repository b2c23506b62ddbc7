//! Entry store behavior: upsert semantics, listings, cascades, concurrency

use std::sync::Arc;
use std::thread;

use aclbit::{
    AccessControl, Config, EntryKey, EntryStore, Grant, MemoryCatalog, MemoryDirectory, PrincipalRef, ResourceRef,
    ALL_BITS, DELETE, READ, WRITE,
};
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let mut cfg = Config::with_store_path(dir.path());
    cfg.store.map_size = 10 << 20;
    cfg
}

fn setup() -> (TempDir, AccessControl<MemoryCatalog, MemoryDirectory>) {
    let dir = TempDir::new().unwrap();
    let catalog = MemoryCatalog::new();
    catalog.add_workspace(1, "Acme");
    catalog.add_project(10, 1, "Rocket");
    catalog.add_feature(100, 10, "Boosters");
    catalog.add_workspace(2, "Globex");
    catalog.add_project(20, 2, "Widgets");
    let members = MemoryDirectory::new();
    members.add_user(1, "alice");
    members.add_user(2, "bob");
    let acl = AccessControl::open(config(&dir), catalog, members).unwrap();
    (dir, acl)
}

#[test]
fn second_grant_replaces_first() {
    let (_dir, acl) = setup();
    let p = ResourceRef::project(10);
    let alice = PrincipalRef::user(1);

    acl.grant(p, alice, READ, true).unwrap();
    acl.grant(p, alice, READ | WRITE, false).unwrap();

    let entries = acl.list_for_resource(&p).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].grant, Grant { permissions: READ | WRITE, deny: false, inherit_to_children: false });

    // deny at the same key replaces the allow
    acl.deny(p, alice, DELETE, true).unwrap();
    let entries = acl.list_for_resource(&p).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].grant.deny);
    assert_eq!(acl.store().count().unwrap(), 1);
}

#[test]
fn revoke_is_idempotent() {
    let (_dir, acl) = setup();
    let p = ResourceRef::project(10);
    let alice = PrincipalRef::user(1);

    acl.grant(p, alice, READ, true).unwrap();
    assert!(acl.revoke(p, alice).unwrap());
    assert!(!acl.revoke(p, alice).unwrap());
    assert_eq!(acl.store().count().unwrap(), 0);
}

#[test]
fn listings_by_resource_and_principal() {
    let (_dir, acl) = setup();
    let alice = PrincipalRef::user(1);
    let bob = PrincipalRef::user(2);

    acl.grant(ResourceRef::workspace(1), alice, READ, true).unwrap();
    acl.grant(ResourceRef::project(10), alice, WRITE, true).unwrap();
    acl.grant(ResourceRef::project(10), bob, READ, true).unwrap();
    acl.grant(ResourceRef::root(), bob, READ, true).unwrap();

    let on_project = acl.list_for_resource(&ResourceRef::project(10)).unwrap();
    assert_eq!(on_project.len(), 2);
    assert!(on_project.iter().all(|e| e.resource() == ResourceRef::project(10)));

    let alices = acl.list_for_principal(&alice).unwrap();
    assert_eq!(alices.len(), 2);
    assert!(alices.iter().all(|e| e.principal() == alice));

    let on_root = acl.list_for_resource(&ResourceRef::root()).unwrap();
    assert_eq!(on_root.len(), 1);
    assert_eq!(on_root[0].principal(), bob);

    // Users and groups with the same id are distinct principals
    assert!(acl.list_for_principal(&PrincipalRef::group(1)).unwrap().is_empty());
}

#[test]
fn delete_resource_cascades_to_descendants() {
    let (_dir, acl) = setup();
    let alice = PrincipalRef::user(1);

    acl.grant(ResourceRef::workspace(1), alice, READ, true).unwrap();
    acl.grant(ResourceRef::project(10), alice, READ, true).unwrap();
    acl.grant(ResourceRef::feature(100), alice, READ, true).unwrap();
    acl.grant(ResourceRef::workspace(2), alice, READ, true).unwrap();
    acl.grant(ResourceRef::project(20), alice, READ, true).unwrap();

    let removed = acl.delete_resource(ResourceRef::workspace(1)).unwrap();
    assert_eq!(removed, 3);

    let left = acl.list_for_principal(&alice).unwrap();
    assert_eq!(left.len(), 2);
    let resources: Vec<ResourceRef> = left.iter().map(|e| e.resource()).collect();
    assert!(resources.contains(&ResourceRef::workspace(2)));
    assert!(resources.contains(&ResourceRef::project(20)));
}

#[test]
fn update_runs_in_one_transaction() {
    let dir = TempDir::new().unwrap();
    let store = EntryStore::open(&config(&dir).store).unwrap();
    let key = EntryKey::new(ResourceRef::workspace(1), PrincipalRef::user(1));

    let (before, after) = store.update(&key, |cur| Some(cur.unwrap_or(Grant::allow(READ)))).unwrap();
    assert_eq!(before, None);
    assert_eq!(after, Some(Grant::allow(READ)));

    let (before, after) = store.update(&key, |_| None).unwrap();
    assert_eq!(before, Some(Grant::allow(READ)));
    assert_eq!(after, None);
    assert!(store.get(&key).unwrap().is_none());
}

#[test]
fn concurrent_merges_lose_no_bits() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(EntryStore::open(&config(&dir).store).unwrap());
    let key = EntryKey::new(ResourceRef::project(10), PrincipalRef::user(1));

    let handles: Vec<_> = (0..5)
        .map(|bit| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .update(&key, |cur| {
                        let mut g = cur.unwrap_or(Grant::allow(0));
                        g.permissions |= 1 << bit;
                        Some(g)
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.get(&key).unwrap().unwrap().grant.permissions, ALL_BITS);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let key = EntryKey::new(ResourceRef::workspace(1), PrincipalRef::group(7));
    {
        let store = EntryStore::open(&config(&dir).store).unwrap();
        store.upsert(&key, Grant::deny(WRITE).with_inherit(false)).unwrap();
    }
    let store = EntryStore::open(&config(&dir).store).unwrap();
    let e = store.get(&key).unwrap().unwrap();
    assert_eq!(e.grant, Grant { permissions: WRITE, deny: true, inherit_to_children: false });
}
