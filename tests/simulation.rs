//! Change simulation: impact classes, warnings, and the no-write guarantee

use aclbit::{
    AccessControl, ActionKind, AclError, Change, Config, Impact, MemoryCatalog, MemoryDirectory, Preset, PrincipalRef,
    ResourceRef, Warning, MANAGE_PERMISSIONS, READ, WRITE,
};
use tempfile::TempDir;

type Acl = AccessControl<MemoryCatalog, MemoryDirectory>;

const ALICE: u64 = 1;
const BOB: u64 = 2;
const CAROL: u64 = 3;
const DEVS: u64 = 50;

fn setup() -> (TempDir, Acl) {
    let dir = TempDir::new().unwrap();
    let mut cfg = Config::with_store_path(dir.path());
    cfg.store.map_size = 10 << 20;

    let catalog = MemoryCatalog::new();
    catalog.add_workspace(1, "Acme");
    catalog.add_project(10, 1, "Rocket");
    catalog.add_feature(100, 10, "Boosters");

    let members = MemoryDirectory::new();
    members.add_user(ALICE, "alice");
    members.add_user(BOB, "bob");
    members.add_user(CAROL, "carol");
    members.add_group(DEVS, "devs");
    members.add_member(DEVS, BOB).unwrap();

    let acl = AccessControl::open(cfg, catalog, members).unwrap();
    (dir, acl)
}

fn user(id: u64) -> PrincipalRef {
    PrincipalRef::user(id)
}

fn project() -> ResourceRef {
    ResourceRef::project(10)
}

#[test]
fn grant_to_newcomers() {
    let (_dir, acl) = setup();
    let sim = acl
        .simulate_change(Change::Template(Preset::Contributor), project(), &[user(ALICE), user(CAROL)], true)
        .unwrap();

    assert_eq!(sim.action, ActionKind::Template);
    assert_eq!(sim.results.len(), 2);
    assert!(sim.results.iter().all(|r| r.impact == Impact::New && r.after == 7));
    assert_eq!(sim.results[0].principal_name, "alice");
    assert_eq!(sim.results[0].after_label, "Contributor");
    assert_eq!(sim.summary.new, 2);
    assert_eq!(sim.summary.total, 2);
}

#[test]
fn simulation_never_writes() {
    let (_dir, acl) = setup();
    acl.grant(project(), user(ALICE), READ, true).unwrap();
    let before = acl.calculate_effective(user(ALICE), project()).unwrap();
    let count = acl.store().count().unwrap();

    for change in [Change::Grant(31), Change::Deny(READ), Change::Revoke, Change::Template(Preset::Editor)] {
        acl.simulate_change(change, project(), &[user(ALICE), user(CAROL)], true).unwrap();
    }

    assert_eq!(acl.store().count().unwrap(), count);
    acl.cache().clear();
    assert_eq!(acl.calculate_effective(user(ALICE), project()).unwrap(), before);
}

#[test]
fn upgrade_and_downgrade() {
    let (_dir, acl) = setup();
    acl.grant(project(), user(ALICE), Preset::ReadOnly.mask(), true).unwrap();
    acl.grant(project(), user(CAROL), Preset::FullControl.mask(), true).unwrap();

    let sim = acl
        .simulate_change(Change::Template(Preset::Editor), project(), &[user(ALICE), user(CAROL)], true)
        .unwrap();
    assert_eq!(sim.results[0].impact, Impact::Upgraded);
    assert_eq!(sim.results[0].before, 1);
    assert_eq!(sim.results[0].after, 15);
    assert_eq!(sim.results[1].impact, Impact::Downgraded);
    assert_eq!(sim.summary.upgraded, 1);
    assert_eq!(sim.summary.downgraded, 1);
}

#[test]
fn revoke_of_inherited_only_access_is_a_noop() {
    let (_dir, acl) = setup();
    acl.grant(ResourceRef::workspace(1), user(ALICE), READ, true).unwrap();

    let sim = acl.simulate_change(Change::Revoke, project(), &[user(ALICE)], true).unwrap();
    assert_eq!(sim.results[0].impact, Impact::Unchanged);
    assert_eq!(sim.results[0].after, READ);
    assert!(sim
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::NoOp { principal, .. } if *principal == user(ALICE))));
}

#[test]
fn revoke_removes_direct_access() {
    let (_dir, acl) = setup();
    acl.grant(project(), user(ALICE), READ | WRITE, true).unwrap();

    let sim = acl.simulate_change(Change::Revoke, project(), &[user(ALICE)], true).unwrap();
    assert_eq!(sim.results[0].impact, Impact::Removed);
    assert_eq!(sim.summary.removed, 1);
    assert!(sim.warnings.is_empty());
}

#[test]
fn removing_the_last_manager_warns_lockout() {
    let (_dir, acl) = setup();
    acl.grant(project(), user(ALICE), Preset::FullControl.mask(), true).unwrap();
    acl.grant(project(), user(CAROL), READ, true).unwrap();

    let sim = acl.simulate_change(Change::Revoke, project(), &[user(ALICE)], true).unwrap();
    assert!(sim.warnings.iter().any(|w| matches!(w, Warning::Lockout { holders_before: 1, .. })));

    let sim = acl.simulate_change(Change::Deny(MANAGE_PERMISSIONS), project(), &[user(ALICE)], true).unwrap();
    assert!(sim.warnings.iter().any(|w| matches!(w, Warning::Lockout { .. })));
}

#[test]
fn no_lockout_while_another_manager_remains() {
    let (_dir, acl) = setup();
    acl.grant(project(), user(ALICE), Preset::FullControl.mask(), true).unwrap();
    // Bob manages through his group, inherited from the workspace
    acl.grant(ResourceRef::workspace(1), PrincipalRef::group(DEVS), MANAGE_PERMISSIONS, true).unwrap();

    let sim = acl.simulate_change(Change::Revoke, project(), &[user(ALICE)], true).unwrap();
    assert!(!sim.warnings.iter().any(|w| matches!(w, Warning::Lockout { .. })));
}

#[test]
fn memberless_group_does_not_prevent_lockout() {
    let (_dir, acl) = setup();
    acl.members().add_group(60, "nobody");
    acl.grant(project(), PrincipalRef::group(60), MANAGE_PERMISSIONS, true).unwrap();
    acl.grant(project(), user(ALICE), Preset::FullControl.mask(), true).unwrap();

    let sim = acl.simulate_change(Change::Revoke, project(), &[user(ALICE)], true).unwrap();
    assert!(sim.warnings.iter().any(|w| matches!(w, Warning::Lockout { holders_before: 1, .. })));
}

#[test]
fn grant_under_existing_deny_warns() {
    let (_dir, acl) = setup();
    acl.deny(ResourceRef::workspace(1), PrincipalRef::group(DEVS), WRITE, true).unwrap();

    let sim = acl
        .simulate_change(Change::Template(Preset::Contributor), project(), &[user(BOB)], true)
        .unwrap();
    assert_eq!(sim.results[0].after, 5);
    assert!(sim
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::DenyOverridesGrant { masked, .. } if *masked == WRITE)));
}

#[test]
fn deny_for_a_group_member() {
    let (_dir, acl) = setup();
    acl.grant(project(), PrincipalRef::group(DEVS), Preset::Editor.mask(), true).unwrap();

    let sim = acl.simulate_change(Change::Deny(WRITE), project(), &[user(BOB)], true).unwrap();
    assert_eq!(sim.results[0].before, 15);
    assert_eq!(sim.results[0].after, 13);
    assert_eq!(sim.results[0].impact, Impact::Downgraded);
}

#[test]
fn committed_change_matches_simulation() {
    let (_dir, acl) = setup();
    acl.grant(ResourceRef::workspace(1), user(ALICE), READ, true).unwrap();

    let change = Change::parse(ActionKind::Grant, Some(WRITE), None).unwrap();
    let targets = [user(ALICE), user(CAROL)];
    let sim = acl.simulate_change(change, project(), &targets, true).unwrap();

    acl.commit_change(change, project(), &targets, true).unwrap();
    for r in &sim.results {
        let actual = acl.calculate_effective(r.principal, project()).unwrap();
        assert_eq!(actual.effective_permissions, r.after);
    }
}

#[test]
fn bad_input_is_rejected() {
    let (_dir, acl) = setup();
    assert!(matches!(
        Change::parse(ActionKind::Template, None, Some("Superuser")),
        Err(AclError::UnknownTemplate(_))
    ));
    assert!(matches!(
        acl.simulate_change(Change::Grant(99), project(), &[user(ALICE)], true),
        Err(AclError::InvalidMask(99))
    ));
    assert!(matches!(
        acl.simulate_change(Change::Deny(64), project(), &[user(ALICE)], true),
        Err(AclError::InvalidMask(64))
    ));
    assert!(matches!(
        acl.simulate_change(Change::Revoke, ResourceRef { id: None, ..project() }, &[user(ALICE)], true),
        Err(AclError::InvalidResourceKind(_))
    ));
}
