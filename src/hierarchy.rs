//! Resource tree: root -> {system, dashboard, admin, workspace} -> project -> feature
//!
//! The taxonomy is fixed, so only collection links (project -> workspace,
//! feature -> project) are asked of the catalog. A collection resource whose
//! owner the catalog does not know hangs directly off root.

use crate::constants::MAX_HIERARCHY_DEPTH;
use crate::directory::ResourceCatalog;
use crate::error::Result;
use crate::model::{ResourceKind, ResourceRef};

/// Parent of a resource, or None for root and for detached kinds
pub fn parent<C: ResourceCatalog + ?Sized>(catalog: &C, r: &ResourceRef) -> Option<ResourceRef> {
    let expected = match r.kind {
        ResourceKind::Root | ResourceKind::Profile | ResourceKind::Group => return None,
        ResourceKind::System | ResourceKind::Dashboard | ResourceKind::Admin | ResourceKind::Workspace => {
            return Some(ResourceRef::root())
        }
        ResourceKind::Project => ResourceKind::Workspace,
        ResourceKind::Feature => ResourceKind::Project,
    };
    match catalog.parent_of(r) {
        Some(p) if p.kind == expected && p.validate().is_ok() => Some(p),
        _ => Some(ResourceRef::root()),
    }
}

/// Ancestors of a resource, nearest first, ending at root.
/// Empty for root itself and for resources outside the tree.
pub fn ancestors<C: ResourceCatalog + ?Sized>(catalog: &C, r: &ResourceRef) -> Result<Vec<ResourceRef>> {
    r.validate()?;
    let mut chain = Vec::new();
    let mut cur = *r;
    for _ in 0..MAX_HIERARCHY_DEPTH {
        match parent(catalog, &cur) {
            Some(p) => {
                chain.push(p);
                cur = p;
            }
            None => break,
        }
    }
    Ok(chain)
}

/// Direct children within the tree
pub fn children<C: ResourceCatalog + ?Sized>(catalog: &C, r: &ResourceRef) -> Vec<ResourceRef> {
    let wanted = match r.kind {
        ResourceKind::Root => {
            let mut out = vec![
                ResourceRef::singleton(ResourceKind::System),
                ResourceRef::singleton(ResourceKind::Dashboard),
                ResourceRef::singleton(ResourceKind::Admin),
            ];
            out.extend(
                catalog
                    .children_of(r)
                    .into_iter()
                    .filter(|c| c.kind == ResourceKind::Workspace && c.validate().is_ok()),
            );
            return out;
        }
        ResourceKind::Workspace => ResourceKind::Project,
        ResourceKind::Project => ResourceKind::Feature,
        ResourceKind::System
        | ResourceKind::Dashboard
        | ResourceKind::Admin
        | ResourceKind::Feature
        | ResourceKind::Profile
        | ResourceKind::Group => return Vec::new(),
    };
    catalog
        .children_of(r)
        .into_iter()
        .filter(|c| c.kind == wanted && c.validate().is_ok())
        .collect()
}

/// The resource followed by all of its descendants, parents before children
pub fn subtree<C: ResourceCatalog + ?Sized>(catalog: &C, r: &ResourceRef) -> Result<Vec<ResourceRef>> {
    r.validate()?;
    let mut out = vec![*r];
    let mut i = 0;
    while i < out.len() {
        let kids = children(catalog, &out[i]);
        out.extend(kids);
        i += 1;
    }
    Ok(out)
}
