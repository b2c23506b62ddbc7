//! Effective permission calculation
//!
//! Candidate entries are the resource itself plus every ancestor, each paired
//! with the principal and each of its groups. Entries on the resource itself
//! always apply; entries on ancestors apply only when `inherit_to_children`.
//! All allow bits are OR'd, all deny bits are OR'd, and deny wins bit-for-bit
//! regardless of where either came from. Proximity carries no weight.

use serde::Serialize;
use tracing::debug;

use crate::bits::{self, Mask};
use crate::directory::{MembershipStore, PrincipalResolver, ResourceCatalog};
use crate::error::Result;
use crate::hierarchy;
use crate::model::{EntryKey, Grant, PrincipalKind, PrincipalRef, ResourceRef};
use crate::read::EntryLookup;

/// One contributing entry, tagged with where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcedEntry {
    pub resource: ResourceRef,
    pub principal: PrincipalRef,
    pub permissions: Mask,
    pub deny: bool,
    pub inherit_to_children: bool,
    /// Set for entries held by a group
    pub group_name: Option<String>,
}

/// The three bitmasks behind a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Calculation {
    pub allowed_bits: Mask,
    pub denied_bits: Mask,
    pub final_bits: Mask,
}

/// Effective permissions of a principal on a resource. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveResult {
    pub effective_permissions: Mask,
    pub direct_entries: Vec<SourcedEntry>,
    pub group_entries: Vec<SourcedEntry>,
    pub inherited_entries: Vec<SourcedEntry>,
    pub calculation: Calculation,
}

impl EffectiveResult {
    #[inline]
    pub fn allows(&self, required: Mask) -> bool {
        bits::has_bit(self.effective_permissions, required)
    }

    pub fn preset_name(&self) -> Option<&'static str> {
        bits::preset_name(self.effective_permissions)
    }

    fn all_entries(&self) -> impl Iterator<Item = &SourcedEntry> {
        self.direct_entries
            .iter()
            .chain(self.group_entries.iter())
            .chain(self.inherited_entries.iter())
    }
}

/// Borrowed collaborators for one calculation
pub struct Calculator<'a, L: ?Sized, C: ?Sized, M: ?Sized> {
    lookup: &'a L,
    catalog: &'a C,
    members: &'a M,
}

impl<'a, L, C, M> Calculator<'a, L, C, M>
where
    L: EntryLookup + ?Sized,
    C: ResourceCatalog + ?Sized,
    M: MembershipStore + ?Sized,
{
    pub fn new(lookup: &'a L, catalog: &'a C, members: &'a M) -> Self {
        Calculator { lookup, catalog, members }
    }

    pub fn calculate(&self, principal: &PrincipalRef, resource: &ResourceRef) -> Result<EffectiveResult> {
        self.calculate_with_chain(principal, resource).map(|(r, _)| r)
    }

    /// Also returns the resource chain (resource first) the result depends on
    pub fn calculate_with_chain(
        &self,
        principal: &PrincipalRef,
        resource: &ResourceRef,
    ) -> Result<(EffectiveResult, Vec<ResourceRef>)> {
        let ancestors = hierarchy::ancestors(self.catalog, resource)?;
        let resolver = PrincipalResolver::new(self.members);

        let mut holders = vec![*principal];
        holders.extend(resolver.groups_of(principal).into_iter().map(PrincipalRef::group));

        let mut result = EffectiveResult::default();

        for holder in &holders {
            if let Some(g) = self.lookup.lookup(&EntryKey::new(*resource, *holder))? {
                let tagged = tag(&resolver, *resource, *holder, g);
                match holder.kind {
                    PrincipalKind::User => result.direct_entries.push(tagged),
                    PrincipalKind::Group => result.group_entries.push(tagged),
                }
            }
        }

        for ancestor in &ancestors {
            for holder in &holders {
                match self.lookup.lookup(&EntryKey::new(*ancestor, *holder))? {
                    Some(g) if g.inherit_to_children => {
                        result.inherited_entries.push(tag(&resolver, *ancestor, *holder, g));
                    }
                    _ => {}
                }
            }
        }

        let allowed = bits::combine(result.all_entries().filter(|e| !e.deny).map(|e| e.permissions));
        let denied = bits::combine(result.all_entries().filter(|e| e.deny).map(|e| e.permissions));
        let final_bits = bits::apply(allowed, denied);
        result.effective_permissions = final_bits;
        result.calculation = Calculation { allowed_bits: allowed, denied_bits: denied, final_bits };

        debug!(
            principal = %principal,
            resource = %resource,
            allowed,
            denied,
            final_bits,
            "effective permissions calculated"
        );

        let mut chain = Vec::with_capacity(ancestors.len() + 1);
        chain.push(*resource);
        chain.extend(ancestors);
        Ok((result, chain))
    }
}

fn tag<M: MembershipStore + ?Sized>(
    resolver: &PrincipalResolver<'_, M>,
    resource: ResourceRef,
    holder: PrincipalRef,
    g: Grant,
) -> SourcedEntry {
    SourcedEntry {
        resource,
        principal: holder,
        permissions: g.permissions,
        deny: g.deny,
        inherit_to_children: g.inherit_to_children,
        group_name: match holder.kind {
            PrincipalKind::Group => Some(resolver.name_of(&holder)),
            PrincipalKind::User => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::{Preset, DELETE, EXECUTE, MANAGE_PERMISSIONS, READ, WRITE};
    use crate::directory::{MemoryCatalog, MemoryDirectory};
    use crate::read::MemoryEntries;

    struct World {
        catalog: MemoryCatalog,
        dir: MemoryDirectory,
        entries: MemoryEntries,
    }

    fn world() -> World {
        let catalog = MemoryCatalog::new();
        catalog.add_workspace(1, "Acme");
        catalog.add_project(10, 1, "Rocket");
        let dir = MemoryDirectory::new();
        dir.add_user(100, "alice");
        dir.add_group(200, "devs");
        dir.add_member(200, 100).unwrap();
        World { catalog, dir, entries: MemoryEntries::new() }
    }

    fn calc(w: &World, p: PrincipalRef, r: ResourceRef) -> EffectiveResult {
        Calculator::new(&w.entries, &w.catalog, &w.dir).calculate(&p, &r).unwrap()
    }

    #[test]
    fn no_entries_means_no_access() {
        let w = world();
        let r = calc(&w, PrincipalRef::user(100), ResourceRef::project(10));
        assert_eq!(r, EffectiveResult::default());
    }

    #[test]
    fn group_deny_beats_direct_full_control() {
        let mut w = world();
        let p = ResourceRef::project(10);
        w.entries.insert(EntryKey::new(p, PrincipalRef::user(100)), Grant::allow(Preset::FullControl.mask()));
        w.entries.insert(EntryKey::new(p, PrincipalRef::group(200)), Grant::deny(WRITE));
        let r = calc(&w, PrincipalRef::user(100), p);
        assert_eq!(r.effective_permissions, READ | EXECUTE | DELETE | MANAGE_PERMISSIONS);
        assert_eq!(r.calculation.denied_bits, WRITE);
        assert_eq!(r.group_entries[0].group_name.as_deref(), Some("devs"));
    }

    #[test]
    fn ancestor_grants_are_ored_not_replaced() {
        let mut w = world();
        w.entries.insert(
            EntryKey::new(ResourceRef::workspace(1), PrincipalRef::user(100)),
            Grant::allow(Preset::Editor.mask()),
        );
        w.entries.insert(
            EntryKey::new(ResourceRef::project(10), PrincipalRef::user(100)),
            Grant::allow(Preset::ReadOnly.mask()),
        );
        let r = calc(&w, PrincipalRef::user(100), ResourceRef::project(10));
        assert_eq!(r.effective_permissions, Preset::Editor.mask());
    }

    #[test]
    fn inherit_flag_only_gates_descendants() {
        let mut w = world();
        let ws = ResourceRef::workspace(1);
        w.entries.insert(EntryKey::new(ws, PrincipalRef::user(100)), Grant::allow(READ).with_inherit(false));
        assert_eq!(calc(&w, PrincipalRef::user(100), ws).effective_permissions, READ);
        let child = calc(&w, PrincipalRef::user(100), ResourceRef::project(10));
        assert!(child.inherited_entries.is_empty());
        assert_eq!(child.effective_permissions, 0);
    }

    #[test]
    fn group_principal_sees_own_entries_as_group_entries() {
        let mut w = world();
        w.entries.insert(EntryKey::new(ResourceRef::project(10), PrincipalRef::group(200)), Grant::allow(WRITE));
        let r = calc(&w, PrincipalRef::group(200), ResourceRef::project(10));
        assert!(r.direct_entries.is_empty());
        assert_eq!(r.group_entries.len(), 1);
        assert_eq!(r.effective_permissions, WRITE);
    }

    #[test]
    fn chain_lists_resource_then_ancestors() {
        let w = world();
        let (_, chain) = Calculator::new(&w.entries, &w.catalog, &w.dir)
            .calculate_with_chain(&PrincipalRef::user(100), &ResourceRef::project(10))
            .unwrap();
        assert_eq!(chain, vec![ResourceRef::project(10), ResourceRef::workspace(1), ResourceRef::root()]);
    }
}
