//! The administrative surface: mutations, inspection, simulation, bulk transfer

use tracing::info;

use crate::bits::{self, Mask};
use crate::cache::PermissionCache;
use crate::calc::{Calculator, EffectiveResult};
use crate::config::Config;
use crate::db::EntryStore;
use crate::directory::{MembershipStore, ResourceCatalog};
use crate::error::Result;
use crate::hierarchy;
use crate::model::{Entry, EntryKey, Grant, PrincipalRef, ResourceRef};
use crate::simulate::{Change, SimulationResult, Simulator};
use crate::transfer::{CancelToken, ExportOutput, ExportScope, Format, ImportMode, ImportPreview, ImportResult, Transfer};

/// Access control engine over one entry store
pub struct AccessControl<C, M> {
    store: EntryStore,
    catalog: C,
    members: M,
    cache: PermissionCache,
    config: Config,
}

impl<C: ResourceCatalog, M: MembershipStore> AccessControl<C, M> {
    pub fn open(config: Config, catalog: C, members: M) -> Result<Self> {
        config.validate()?;
        let store = EntryStore::open(&config.store)?;
        let cache = PermissionCache::new(&config.cache);
        Ok(AccessControl { store, catalog, members, cache, config })
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn members(&self) -> &M {
        &self.members
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Allow `permissions`; replaces any entry at the same key
    pub fn grant(&self, resource: ResourceRef, principal: PrincipalRef, permissions: Mask, inherit_to_children: bool) -> Result<Entry> {
        self.put(resource, principal, Grant::allow(permissions).with_inherit(inherit_to_children))
    }

    /// Deny `permissions`; replaces any entry at the same key
    pub fn deny(&self, resource: ResourceRef, principal: PrincipalRef, permissions: Mask, inherit_to_children: bool) -> Result<Entry> {
        self.put(resource, principal, Grant::deny(permissions).with_inherit(inherit_to_children))
    }

    fn put(&self, resource: ResourceRef, principal: PrincipalRef, grant: Grant) -> Result<Entry> {
        let entry = self.store.upsert(&EntryKey::new(resource, principal), grant)?;
        self.cache.invalidate_resource(&resource);
        info!(
            resource = %resource,
            principal = %principal,
            permissions = grant.permissions,
            deny = grant.deny,
            inherit = grant.inherit_to_children,
            "entry written"
        );
        Ok(entry)
    }

    /// Remove the entry at the exact key. Idempotent; true if something was removed.
    pub fn revoke(&self, resource: ResourceRef, principal: PrincipalRef) -> Result<bool> {
        resource.validate()?;
        let removed = self.store.delete(&EntryKey::new(resource, principal))?;
        self.cache.invalidate_resource(&resource);
        info!(resource = %resource, principal = %principal, removed, "entry revoked");
        Ok(removed)
    }

    /// Delete every entry on `resource` and its descendants
    pub fn delete_resource(&self, resource: ResourceRef) -> Result<usize> {
        let doomed = hierarchy::subtree(&self.catalog, &resource)?;
        let n = self.store.delete_for_resources(&doomed)?;
        self.cache.invalidate_resource(&resource);
        info!(resource = %resource, resources = doomed.len(), entries = n, "resource entries deleted");
        Ok(n)
    }

    /// Apply a change that was previously simulated
    pub fn commit_change(
        &self,
        change: Change,
        resource: ResourceRef,
        principals: &[PrincipalRef],
        inherit_to_children: bool,
    ) -> Result<()> {
        for p in principals {
            match change.grant(inherit_to_children) {
                Some(g) => {
                    self.put(resource, *p, g)?;
                }
                None => {
                    self.revoke(resource, *p)?;
                }
            }
        }
        Ok(())
    }

    /// Group membership changed outside the engine
    pub fn membership_changed(&self, user: u64) {
        self.cache.invalidate_principal(&PrincipalRef::user(user));
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn calculate_effective(&self, principal: PrincipalRef, resource: ResourceRef) -> Result<EffectiveResult> {
        if let Some(hit) = self.cache.get(&principal, &resource) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let snap = self.store.snapshot()?;
        let (result, chain) =
            Calculator::new(&snap, &self.catalog, &self.members).calculate_with_chain(&principal, &resource)?;
        self.cache.put(generation, principal, resource, result.clone(), chain);
        Ok(result)
    }

    /// True when every bit of `required` is effective
    pub fn check(&self, principal: PrincipalRef, resource: ResourceRef, required: Mask) -> Result<bool> {
        Ok(bits::has_bit(self.calculate_effective(principal, resource)?.effective_permissions, required))
    }

    pub fn list_for_resource(&self, resource: &ResourceRef) -> Result<Vec<Entry>> {
        resource.validate()?;
        self.store.list_for_resource(resource)
    }

    pub fn list_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Entry>> {
        self.store.list_for_principal(principal)
    }

    // ========================================================================
    // Simulation and transfer
    // ========================================================================

    pub fn simulate_change(
        &self,
        change: Change,
        resource: ResourceRef,
        principals: &[PrincipalRef],
        inherit_to_children: bool,
    ) -> Result<SimulationResult> {
        let snap = self.store.snapshot()?;
        Simulator::new(&snap, &self.catalog, &self.members).simulate(change, &resource, principals, inherit_to_children)
    }

    pub fn export_acl(
        &self,
        scope: &ExportScope,
        format: Format,
        include_children: bool,
        cancel: &CancelToken,
    ) -> Result<ExportOutput> {
        self.transfer().export(&self.store, scope, format, include_children, cancel)
    }

    pub fn import_preview(&self, data: &str, format: Format, mode: ImportMode) -> Result<ImportPreview> {
        let snap = self.store.snapshot()?;
        self.transfer().preview(&snap, data, format, mode)
    }

    /// Commit an import. Pass the preview's digest to refuse a plan that changed since.
    pub fn import_execute(
        &self,
        data: &str,
        format: Format,
        mode: ImportMode,
        expected_digest: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<ImportResult> {
        self.transfer().execute(&self.store, data, format, mode, expected_digest, cancel, |key| {
            self.cache.invalidate_resource(&key.resource)
        })
    }

    fn transfer(&self) -> Transfer<'_, C, M> {
        Transfer::new(&self.catalog, &self.members, &self.config.transfer)
    }
}
