//! External collaborators: resource catalog and membership store
//!
//! The engine never owns resource or group data. It asks a [`ResourceCatalog`]
//! for parent/child links and display names, and a [`MembershipStore`] for
//! group membership. In-memory implementations are provided for embedding
//! and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use tracing::debug;

use crate::error::{AclError, Result};
use crate::model::{PrincipalKind, PrincipalRef, ResourceKind, ResourceRef};

/// Source of resource structure and names
pub trait ResourceCatalog {
    /// Owning resource of a collection resource, if known
    fn parent_of(&self, resource: &ResourceRef) -> Option<ResourceRef>;
    /// Direct children of a resource
    fn children_of(&self, resource: &ResourceRef) -> Vec<ResourceRef>;
    fn display_name(&self, resource: &ResourceRef) -> Option<String>;
    fn find_by_name(&self, kind: ResourceKind, name: &str) -> Option<ResourceRef>;
    fn exists(&self, resource: &ResourceRef) -> bool;
}

/// Source of users, groups and membership
pub trait MembershipStore {
    /// Groups the user belongs to. Errors for unknown users.
    fn groups_of(&self, user: u64) -> Result<BTreeSet<u64>>;
    fn members_of(&self, group: u64) -> Result<BTreeSet<u64>>;
    fn principal_name(&self, principal: &PrincipalRef) -> Option<String>;
    fn find_principal(&self, kind: PrincipalKind, name: &str) -> Option<PrincipalRef>;
}

/// Membership lookups that degrade to "no groups" instead of failing
pub struct PrincipalResolver<'a, M: MembershipStore + ?Sized> {
    store: &'a M,
}

impl<'a, M: MembershipStore + ?Sized> PrincipalResolver<'a, M> {
    pub fn new(store: &'a M) -> Self {
        PrincipalResolver { store }
    }

    /// Group ids for a principal. Groups resolve to nothing: membership is not nested.
    pub fn groups_of(&self, principal: &PrincipalRef) -> BTreeSet<u64> {
        match principal.kind {
            PrincipalKind::Group => BTreeSet::new(),
            PrincipalKind::User => self.store.groups_of(principal.id).unwrap_or_else(|e| {
                debug!(user = principal.id, error = %e, "membership lookup failed; resolving without groups");
                BTreeSet::new()
            }),
        }
    }

    pub fn name_of(&self, principal: &PrincipalRef) -> String {
        self.store
            .principal_name(principal)
            .unwrap_or_else(|| principal.to_string())
    }
}

// ============================================================================
// In-memory catalog
// ============================================================================

#[derive(Debug, Clone)]
struct CatalogNode {
    name: String,
    parent: Option<ResourceRef>,
}

/// In-memory [`ResourceCatalog`]. Singletons always exist.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    nodes: RwLock<BTreeMap<ResourceRef, CatalogNode>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_workspace(&self, id: u64, name: &str) -> ResourceRef {
        self.insert(ResourceRef::workspace(id), name, Some(ResourceRef::root()))
    }

    pub fn add_project(&self, id: u64, workspace: u64, name: &str) -> ResourceRef {
        self.insert(ResourceRef::project(id), name, Some(ResourceRef::workspace(workspace)))
    }

    pub fn add_feature(&self, id: u64, project: u64, name: &str) -> ResourceRef {
        self.insert(ResourceRef::feature(id), name, Some(ResourceRef::project(project)))
    }

    /// Register a resource outside the tree (profile, group)
    pub fn add_detached(&self, kind: ResourceKind, id: u64, name: &str) -> Result<ResourceRef> {
        let r = ResourceRef::new(kind, Some(id))?;
        Ok(self.insert(r, name, None))
    }

    pub fn remove(&self, resource: &ResourceRef) {
        let mut nodes = self.nodes.write().unwrap_or_else(|p| p.into_inner());
        nodes.remove(resource);
    }

    fn insert(&self, r: ResourceRef, name: &str, parent: Option<ResourceRef>) -> ResourceRef {
        let mut nodes = self.nodes.write().unwrap_or_else(|p| p.into_inner());
        nodes.insert(r, CatalogNode { name: name.to_string(), parent });
        r
    }
}

impl ResourceCatalog for MemoryCatalog {
    fn parent_of(&self, resource: &ResourceRef) -> Option<ResourceRef> {
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes.get(resource).and_then(|n| n.parent)
    }

    fn children_of(&self, resource: &ResourceRef) -> Vec<ResourceRef> {
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes
            .iter()
            .filter(|(_, n)| n.parent.as_ref() == Some(resource))
            .map(|(r, _)| *r)
            .collect()
    }

    fn display_name(&self, resource: &ResourceRef) -> Option<String> {
        if resource.kind.is_singleton() {
            return Some(resource.kind.as_str().to_string());
        }
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes.get(resource).map(|n| n.name.clone())
    }

    fn find_by_name(&self, kind: ResourceKind, name: &str) -> Option<ResourceRef> {
        if kind.is_singleton() {
            return Some(ResourceRef::singleton(kind));
        }
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes
            .iter()
            .find(|(r, n)| r.kind == kind && n.name == name)
            .map(|(r, _)| *r)
    }

    fn exists(&self, resource: &ResourceRef) -> bool {
        if resource.kind.is_singleton() {
            return true;
        }
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes.contains_key(resource)
    }
}

// ============================================================================
// In-memory membership
// ============================================================================

#[derive(Debug, Default)]
struct Members {
    users: BTreeMap<u64, String>,
    groups: BTreeMap<u64, (String, BTreeSet<u64>)>,
}

/// In-memory [`MembershipStore`]
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: RwLock<Members>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: u64, name: &str) -> PrincipalRef {
        let mut m = self.inner.write().unwrap_or_else(|p| p.into_inner());
        m.users.insert(id, name.to_string());
        PrincipalRef::user(id)
    }

    pub fn add_group(&self, id: u64, name: &str) -> PrincipalRef {
        let mut m = self.inner.write().unwrap_or_else(|p| p.into_inner());
        m.groups.entry(id).or_insert_with(|| (String::new(), BTreeSet::new())).0 = name.to_string();
        PrincipalRef::group(id)
    }

    pub fn add_member(&self, group: u64, user: u64) -> Result<()> {
        let mut m = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if !m.users.contains_key(&user) {
            return Err(AclError::UnknownPrincipal(format!("user:{}", user)));
        }
        let (_, members) = m
            .groups
            .get_mut(&group)
            .ok_or_else(|| AclError::UnknownPrincipal(format!("group:{}", group)))?;
        members.insert(user);
        Ok(())
    }

    pub fn remove_member(&self, group: u64, user: u64) -> bool {
        let mut m = self.inner.write().unwrap_or_else(|p| p.into_inner());
        m.groups.get_mut(&group).map(|(_, s)| s.remove(&user)).unwrap_or(false)
    }
}

impl MembershipStore for MemoryDirectory {
    fn groups_of(&self, user: u64) -> Result<BTreeSet<u64>> {
        let m = self.inner.read().unwrap_or_else(|p| p.into_inner());
        if !m.users.contains_key(&user) {
            return Err(AclError::UnknownPrincipal(format!("user:{}", user)));
        }
        Ok(m.groups
            .iter()
            .filter(|(_, (_, members))| members.contains(&user))
            .map(|(id, _)| *id)
            .collect())
    }

    fn members_of(&self, group: u64) -> Result<BTreeSet<u64>> {
        let m = self.inner.read().unwrap_or_else(|p| p.into_inner());
        m.groups
            .get(&group)
            .map(|(_, s)| s.clone())
            .ok_or_else(|| AclError::UnknownPrincipal(format!("group:{}", group)))
    }

    fn principal_name(&self, principal: &PrincipalRef) -> Option<String> {
        let m = self.inner.read().unwrap_or_else(|p| p.into_inner());
        match principal.kind {
            PrincipalKind::User => m.users.get(&principal.id).cloned(),
            PrincipalKind::Group => m.groups.get(&principal.id).map(|(n, _)| n.clone()),
        }
    }

    fn find_principal(&self, kind: PrincipalKind, name: &str) -> Option<PrincipalRef> {
        let m = self.inner.read().unwrap_or_else(|p| p.into_inner());
        match kind {
            PrincipalKind::User => m.users.iter().find(|(_, n)| *n == name).map(|(id, _)| PrincipalRef::user(*id)),
            PrincipalKind::Group => m
                .groups
                .iter()
                .find(|(_, (n, _))| n == name)
                .map(|(id, _)| PrincipalRef::group(*id)),
        }
    }
}
