//! Change simulation: what would effective permissions become?
//!
//! The requested change is applied to an [`Overlay`] over the current entries
//! for every listed principal at once, then each principal is recalculated
//! before and after. Nothing is written.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::bits::{self, Mask, Preset, MANAGE_PERMISSIONS};
use crate::calc::Calculator;
use crate::directory::{MembershipStore, PrincipalResolver, ResourceCatalog};
use crate::error::{AclError, Result};
use crate::hierarchy;
use crate::model::{EntryKey, Grant, PrincipalKind, PrincipalRef, ResourceRef};
use crate::read::{EntryLookup, Overlay};

/// The kind of administrative change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Grant,
    Deny,
    Revoke,
    Template,
}

impl FromStr for ActionKind {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grant" => Ok(ActionKind::Grant),
            "deny" => Ok(ActionKind::Deny),
            "revoke" => Ok(ActionKind::Revoke),
            "template" => Ok(ActionKind::Template),
            other => Err(AclError::Malformed(format!("unknown action '{}'", other))),
        }
    }
}

/// A fully resolved change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Grant(Mask),
    Deny(Mask),
    Revoke,
    Template(Preset),
}

impl Change {
    /// Build a change from loose administrative input
    pub fn parse(action: ActionKind, permissions: Option<Mask>, template: Option<&str>) -> Result<Self> {
        match action {
            ActionKind::Grant => Ok(Change::Grant(require_mask(action, permissions)?)),
            ActionKind::Deny => Ok(Change::Deny(require_mask(action, permissions)?)),
            ActionKind::Revoke => Ok(Change::Revoke),
            ActionKind::Template => {
                let name = template.ok_or_else(|| AclError::UnknownTemplate("<missing>".into()))?;
                Preset::from_name(name)
                    .map(Change::Template)
                    .ok_or_else(|| AclError::UnknownTemplate(name.to_string()))
            }
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Change::Grant(_) => ActionKind::Grant,
            Change::Deny(_) => ActionKind::Deny,
            Change::Revoke => ActionKind::Revoke,
            Change::Template(_) => ActionKind::Template,
        }
    }

    /// The entry this change writes, or None for a revoke
    pub fn grant(&self, inherit_to_children: bool) -> Option<Grant> {
        match *self {
            Change::Grant(m) => Some(Grant::allow(m).with_inherit(inherit_to_children)),
            Change::Template(p) => Some(Grant::allow(p.mask()).with_inherit(inherit_to_children)),
            Change::Deny(m) => Some(Grant::deny(m).with_inherit(inherit_to_children)),
            Change::Revoke => None,
        }
    }

    fn allow_mask(&self) -> Option<Mask> {
        match *self {
            Change::Grant(m) => Some(m),
            Change::Template(p) => Some(p.mask()),
            Change::Deny(_) | Change::Revoke => None,
        }
    }
}

fn require_mask(action: ActionKind, permissions: Option<Mask>) -> Result<Mask> {
    let m = permissions.ok_or_else(|| AclError::Malformed(format!("{:?} requires permissions", action)))?;
    bits::validate(m)
}

/// How one principal's effective permissions move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    New,
    Upgraded,
    Unchanged,
    Downgraded,
    Removed,
    /// Some bits gained and some lost
    Changed,
}

impl Impact {
    pub fn classify(before: Mask, after: Mask) -> Impact {
        if before == after {
            Impact::Unchanged
        } else if before == 0 {
            Impact::New
        } else if after == 0 {
            Impact::Removed
        } else if bits::is_strict_superset(after, before) {
            Impact::Upgraded
        } else if bits::is_strict_superset(before, after) {
            Impact::Downgraded
        } else {
            Impact::Changed
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Impact::New => "new",
            Impact::Upgraded => "upgraded",
            Impact::Unchanged => "unchanged",
            Impact::Downgraded => "downgraded",
            Impact::Removed => "removed",
            Impact::Changed => "changed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalImpact {
    pub principal: PrincipalRef,
    pub principal_name: String,
    pub before: Mask,
    pub after: Mask,
    pub before_label: String,
    pub after_label: String,
    pub impact: Impact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImpactSummary {
    pub new: usize,
    pub upgraded: usize,
    pub unchanged: usize,
    pub downgraded: usize,
    pub removed: usize,
    pub changed: usize,
    pub total: usize,
}

impl ImpactSummary {
    fn count(&mut self, impact: Impact) {
        self.total += 1;
        match impact {
            Impact::New => self.new += 1,
            Impact::Upgraded => self.upgraded += 1,
            Impact::Unchanged => self.unchanged += 1,
            Impact::Downgraded => self.downgraded += 1,
            Impact::Removed => self.removed += 1,
            Impact::Changed => self.changed += 1,
        }
    }
}

/// Advisory findings. Surfaced with the result, never raised as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Nobody would hold MANAGE_PERMISSIONS on the resource afterwards
    Lockout { resource: ResourceRef, holders_before: usize },
    /// The change has nothing to act on for this principal
    NoOp { principal: PrincipalRef, reason: String },
    /// Granted bits that an existing deny keeps masked
    DenyOverridesGrant { principal: PrincipalRef, masked: Mask },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub action: ActionKind,
    pub resource: ResourceRef,
    pub results: Vec<PrincipalImpact>,
    pub summary: ImpactSummary,
    pub warnings: Vec<Warning>,
}

/// Borrowed collaborators for one simulation
pub struct Simulator<'a, L: ?Sized, C: ?Sized, M: ?Sized> {
    lookup: &'a L,
    catalog: &'a C,
    members: &'a M,
}

impl<'a, L, C, M> Simulator<'a, L, C, M>
where
    L: EntryLookup + ?Sized,
    C: ResourceCatalog + ?Sized,
    M: MembershipStore + ?Sized,
{
    pub fn new(lookup: &'a L, catalog: &'a C, members: &'a M) -> Self {
        Simulator { lookup, catalog, members }
    }

    pub fn simulate(
        &self,
        change: Change,
        resource: &ResourceRef,
        principals: &[PrincipalRef],
        inherit_to_children: bool,
    ) -> Result<SimulationResult> {
        resource.validate()?;
        if let Some(g) = change.grant(inherit_to_children) {
            bits::validate(g.permissions)?;
        }

        let mut overlay = Overlay::new(self.lookup);
        let mut warnings = Vec::new();
        for p in principals {
            let key = EntryKey::new(*resource, *p);
            match change.grant(inherit_to_children) {
                Some(g) => {
                    if g.permissions == 0 {
                        warnings.push(Warning::NoOp { principal: *p, reason: "grants no permissions".into() });
                    }
                    overlay.upsert(key, g);
                }
                None => {
                    if self.lookup.lookup(&key)?.is_none() {
                        warnings.push(Warning::NoOp {
                            principal: *p,
                            reason: "no entry at this resource to revoke".into(),
                        });
                    }
                    overlay.delete(key);
                }
            }
        }

        let current = Calculator::new(self.lookup, self.catalog, self.members);
        let projected = Calculator::new(&overlay, self.catalog, self.members);
        let resolver = PrincipalResolver::new(self.members);

        let mut results = Vec::with_capacity(principals.len());
        let mut summary = ImpactSummary::default();
        for p in principals {
            let before = current.calculate(p, resource)?.effective_permissions;
            let after = projected.calculate(p, resource)?.effective_permissions;
            let impact = Impact::classify(before, after);
            summary.count(impact);

            if let Some(requested) = change.allow_mask() {
                let masked = requested & !after;
                if masked != 0 {
                    warnings.push(Warning::DenyOverridesGrant { principal: *p, masked });
                }
            }

            results.push(PrincipalImpact {
                principal: *p,
                principal_name: resolver.name_of(p),
                before,
                after,
                before_label: bits::describe(before),
                after_label: bits::describe(after),
                impact,
            });
        }

        if let Some(w) = self.lockout(&current, &projected, &overlay, resource, principals)? {
            warn!(resource = %resource, "simulated change would remove the last permission manager");
            warnings.push(w);
        }

        debug!(
            resource = %resource,
            action = ?change.kind(),
            total = summary.total,
            warnings = warnings.len(),
            "change simulated"
        );

        Ok(SimulationResult { action: change.kind(), resource: *resource, results, summary, warnings })
    }

    /// Lockout check over every user that could hold MANAGE_PERMISSIONS here
    fn lockout(
        &self,
        current: &Calculator<'_, L, C, M>,
        projected: &Calculator<'_, Overlay<'_, L>, C, M>,
        overlay: &Overlay<'_, L>,
        resource: &ResourceRef,
        principals: &[PrincipalRef],
    ) -> Result<Option<Warning>> {
        let mut candidates: BTreeSet<PrincipalRef> = principals.iter().copied().collect();
        for e in self.lookup.entries_on(resource)? {
            candidates.insert(e.principal());
        }
        for e in overlay.entries_on(resource)? {
            candidates.insert(e.principal());
        }
        for a in hierarchy::ancestors(self.catalog, resource)? {
            for e in self.lookup.entries_on(&a)? {
                if e.grant.inherit_to_children {
                    candidates.insert(e.principal());
                }
            }
        }
        // Users gain the bit through their groups
        let groups: Vec<u64> = candidates
            .iter()
            .filter(|p| p.kind == PrincipalKind::Group)
            .map(|p| p.id)
            .collect();
        for g in groups {
            if let Ok(users) = self.members.members_of(g) {
                candidates.extend(users.into_iter().map(PrincipalRef::user));
            }
        }

        // Only users can act; a group holds the bit through its members
        let mut before = 0;
        let mut after = 0;
        for p in candidates.iter().filter(|p| p.kind == PrincipalKind::User) {
            if bits::has_bit(current.calculate(p, resource)?.effective_permissions, MANAGE_PERMISSIONS) {
                before += 1;
            }
            if bits::has_bit(projected.calculate(p, resource)?.effective_permissions, MANAGE_PERMISSIONS) {
                after += 1;
            }
        }
        Ok((before > 0 && after == 0).then_some(Warning::Lockout { resource: *resource, holders_before: before }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_classes() {
        assert_eq!(Impact::classify(0, 7), Impact::New);
        assert_eq!(Impact::classify(1, 7), Impact::Upgraded);
        assert_eq!(Impact::classify(7, 7), Impact::Unchanged);
        assert_eq!(Impact::classify(0, 0), Impact::Unchanged);
        assert_eq!(Impact::classify(7, 1), Impact::Downgraded);
        assert_eq!(Impact::classify(7, 0), Impact::Removed);
        assert_eq!(Impact::classify(1, 2), Impact::Changed);
    }

    #[test]
    fn change_parsing() {
        assert_eq!(Change::parse(ActionKind::Grant, Some(7), None).unwrap(), Change::Grant(7));
        assert!(matches!(Change::parse(ActionKind::Deny, None, None), Err(AclError::Malformed(_))));
        assert!(matches!(Change::parse(ActionKind::Grant, Some(64), None), Err(AclError::InvalidMask(64))));
        assert_eq!(
            Change::parse(ActionKind::Template, None, Some("editor")).unwrap(),
            Change::Template(Preset::Editor)
        );
        assert!(matches!(
            Change::parse(ActionKind::Template, None, Some("owner")),
            Err(AclError::UnknownTemplate(_))
        ));
        assert_eq!("REVOKE".parse::<ActionKind>().unwrap(), ActionKind::Revoke);
    }

    #[test]
    fn template_behaves_as_grant() {
        let g = Change::Template(Preset::Contributor).grant(true).unwrap();
        assert_eq!(g, Grant::allow(7));
        assert!(Change::Revoke.grant(true).is_none());
        assert!(Change::Deny(2).grant(false).unwrap().deny);
    }
}
