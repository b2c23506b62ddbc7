//! Resource, principal and entry types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bits::Mask;
use crate::error::{AclError, Result};

/// Kinds of protected resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Root,
    System,
    Dashboard,
    Admin,
    Workspace,
    Project,
    Feature,
    Profile,
    Group,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Root,
        ResourceKind::System,
        ResourceKind::Dashboard,
        ResourceKind::Admin,
        ResourceKind::Workspace,
        ResourceKind::Project,
        ResourceKind::Feature,
        ResourceKind::Profile,
        ResourceKind::Group,
    ];

    /// Singleton kinds have exactly one instance and no id
    pub const fn is_singleton(self) -> bool {
        match self {
            ResourceKind::Root | ResourceKind::System | ResourceKind::Dashboard | ResourceKind::Admin => true,
            ResourceKind::Workspace
            | ResourceKind::Project
            | ResourceKind::Feature
            | ResourceKind::Profile
            | ResourceKind::Group => false,
        }
    }

    /// Whether the kind takes part in inheritance
    pub const fn in_tree(self) -> bool {
        !matches!(self, ResourceKind::Profile | ResourceKind::Group)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Root => "root",
            ResourceKind::System => "system",
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::Admin => "admin",
            ResourceKind::Workspace => "workspace",
            ResourceKind::Project => "project",
            ResourceKind::Feature => "feature",
            ResourceKind::Profile => "profile",
            ResourceKind::Group => "group",
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            ResourceKind::Root => 0,
            ResourceKind::System => 1,
            ResourceKind::Dashboard => 2,
            ResourceKind::Admin => 3,
            ResourceKind::Workspace => 4,
            ResourceKind::Project => 5,
            ResourceKind::Feature => 6,
            ResourceKind::Profile => 7,
            ResourceKind::Group => 8,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<ResourceKind> {
        ResourceKind::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AclError::InvalidResourceKind(format!("unknown resource type '{}'", s)))
    }
}

/// A protected resource. Singleton kinds carry no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Option<u64>,
}

impl ResourceRef {
    /// Build a resource reference, enforcing the singleton/collection id rule
    pub fn new(kind: ResourceKind, id: Option<u64>) -> Result<Self> {
        match (kind.is_singleton(), id) {
            (true, Some(id)) => Err(AclError::InvalidResourceKind(format!("{} is a singleton but got id {}", kind, id))),
            (false, None) => Err(AclError::InvalidResourceKind(format!("{} requires an id", kind))),
            _ => Ok(ResourceRef { kind, id }),
        }
    }

    pub const fn root() -> Self {
        ResourceRef { kind: ResourceKind::Root, id: None }
    }

    pub const fn singleton(kind: ResourceKind) -> Self {
        ResourceRef { kind, id: None }
    }

    pub fn workspace(id: u64) -> Self {
        ResourceRef { kind: ResourceKind::Workspace, id: Some(id) }
    }

    pub fn project(id: u64) -> Self {
        ResourceRef { kind: ResourceKind::Project, id: Some(id) }
    }

    pub fn feature(id: u64) -> Self {
        ResourceRef { kind: ResourceKind::Feature, id: Some(id) }
    }

    /// Re-check the id rule on a value that may have been built by hand
    pub fn validate(&self) -> Result<()> {
        ResourceRef::new(self.kind, self.id).map(|_| ())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Kinds of principals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Group,
}

impl PrincipalKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Group => "group",
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            PrincipalKind::User => 0,
            PrincipalKind::Group => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<PrincipalKind> {
        match tag {
            0 => Some(PrincipalKind::User),
            1 => Some(PrincipalKind::Group),
            _ => None,
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalKind {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(PrincipalKind::User),
            "group" => Ok(PrincipalKind::Group),
            other => Err(AclError::Malformed(format!("unknown principal type '{}'", other))),
        }
    }
}

/// A user or group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalRef {
    pub kind: PrincipalKind,
    pub id: u64,
}

impl PrincipalRef {
    pub const fn user(id: u64) -> Self {
        PrincipalRef { kind: PrincipalKind::User, id }
    }

    pub const fn group(id: u64) -> Self {
        PrincipalRef { kind: PrincipalKind::Group, id }
    }
}

impl fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Unique key of an access-control entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub resource: ResourceRef,
    pub principal: PrincipalRef,
}

impl EntryKey {
    pub const fn new(resource: ResourceRef, principal: PrincipalRef) -> Self {
        EntryKey { resource, principal }
    }
}

/// The grant payload stored under an [`EntryKey`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Grant {
    pub permissions: Mask,
    pub deny: bool,
    pub inherit_to_children: bool,
}

impl Grant {
    pub const fn allow(permissions: Mask) -> Self {
        Grant { permissions, deny: false, inherit_to_children: true }
    }

    pub const fn deny(permissions: Mask) -> Self {
        Grant { permissions, deny: true, inherit_to_children: true }
    }

    pub const fn with_inherit(mut self, inherit_to_children: bool) -> Self {
        self.inherit_to_children = inherit_to_children;
        self
    }
}

/// A persisted access-control entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    pub key: EntryKey,
    pub grant: Grant,
}

impl Entry {
    pub fn resource(&self) -> ResourceRef {
        self.key.resource
    }

    pub fn principal(&self) -> PrincipalRef {
        self.key.principal
    }
}

/// Flat serde form of an entry, used by the JSON interchange format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub resource_type: ResourceKind,
    pub resource_id: Option<u64>,
    pub principal_type: PrincipalKind,
    pub principal_id: u64,
    pub permissions: Mask,
    #[serde(default)]
    pub deny: bool,
    #[serde(default = "default_inherit")]
    pub inherit_to_children: bool,
}

fn default_inherit() -> bool {
    true
}

impl From<&Entry> for EntryRecord {
    fn from(e: &Entry) -> Self {
        EntryRecord {
            resource_type: e.key.resource.kind,
            resource_id: e.key.resource.id,
            principal_type: e.key.principal.kind,
            principal_id: e.key.principal.id,
            permissions: e.grant.permissions,
            deny: e.grant.deny,
            inherit_to_children: e.grant.inherit_to_children,
        }
    }
}
