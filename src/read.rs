//! Read views over the entry table

use std::collections::BTreeMap;

use heed::RoTxn;

use crate::db::Dbs;
use crate::error::Result;
use crate::model::{Entry, EntryKey, Grant, ResourceRef};

/// Anything the calculator can read entries from
pub trait EntryLookup {
    fn lookup(&self, key: &EntryKey) -> Result<Option<Grant>>;
    fn entries_on(&self, resource: &ResourceRef) -> Result<Vec<Entry>>;
}

/// A consistent read transaction over the store
pub struct Snapshot<'e> {
    txn: RoTxn<'e>,
    dbs: &'e Dbs,
}

impl<'e> Snapshot<'e> {
    pub(crate) fn new(txn: RoTxn<'e>, dbs: &'e Dbs) -> Self {
        Snapshot { txn, dbs }
    }
}

impl EntryLookup for Snapshot<'_> {
    #[inline]
    fn lookup(&self, key: &EntryKey) -> Result<Option<Grant>> {
        self.dbs.entries.get(&self.txn, key)
    }

    fn entries_on(&self, resource: &ResourceRef) -> Result<Vec<Entry>> {
        self.dbs.entries.list_resource(&self.txn, resource)
    }
}

/// Hypothetical writes layered over a base view. Nothing reaches the base.
pub struct Overlay<'b, L: EntryLookup + ?Sized> {
    base: &'b L,
    // Some = upserted, None = deleted
    writes: BTreeMap<EntryKey, Option<Grant>>,
}

impl<'b, L: EntryLookup + ?Sized> Overlay<'b, L> {
    pub fn new(base: &'b L) -> Self {
        Overlay { base, writes: BTreeMap::new() }
    }

    pub fn upsert(&mut self, key: EntryKey, grant: Grant) {
        self.writes.insert(key, Some(grant));
    }

    pub fn delete(&mut self, key: EntryKey) {
        self.writes.insert(key, None);
    }
}

impl<L: EntryLookup + ?Sized> EntryLookup for Overlay<'_, L> {
    fn lookup(&self, key: &EntryKey) -> Result<Option<Grant>> {
        match self.writes.get(key) {
            Some(w) => Ok(*w),
            None => self.base.lookup(key),
        }
    }

    fn entries_on(&self, resource: &ResourceRef) -> Result<Vec<Entry>> {
        let mut out: BTreeMap<EntryKey, Grant> = self
            .base
            .entries_on(resource)?
            .into_iter()
            .map(|e| (e.key, e.grant))
            .collect();
        for (k, w) in self.writes.iter().filter(|(k, _)| k.resource == *resource) {
            match w {
                Some(g) => {
                    out.insert(*k, *g);
                }
                None => {
                    out.remove(k);
                }
            }
        }
        Ok(out.into_iter().map(|(key, grant)| Entry { key, grant }).collect())
    }
}

/// Plain in-memory entry set
#[derive(Debug, Clone, Default)]
pub struct MemoryEntries {
    entries: BTreeMap<EntryKey, Grant>,
}

impl MemoryEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EntryKey, grant: Grant) {
        self.entries.insert(key, grant);
    }
}

impl EntryLookup for MemoryEntries {
    fn lookup(&self, key: &EntryKey) -> Result<Option<Grant>> {
        Ok(self.entries.get(key).copied())
    }

    fn entries_on(&self, resource: &ResourceRef) -> Result<Vec<Entry>> {
        Ok(self
            .entries
            .iter()
            .filter(|(k, _)| k.resource == *resource)
            .map(|(key, grant)| Entry { key: *key, grant: *grant })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrincipalRef;

    #[test]
    fn overlay_shadows_without_touching_base() {
        let key = EntryKey::new(ResourceRef::workspace(1), PrincipalRef::user(1));
        let other = EntryKey::new(ResourceRef::workspace(1), PrincipalRef::user(2));
        let mut base = MemoryEntries::new();
        base.insert(key, Grant::allow(1));
        base.insert(other, Grant::allow(3));

        let mut ov = Overlay::new(&base);
        ov.delete(key);
        ov.upsert(EntryKey::new(ResourceRef::workspace(1), PrincipalRef::group(5)), Grant::deny(2));

        assert_eq!(ov.lookup(&key).unwrap(), None);
        assert_eq!(base.lookup(&key).unwrap(), Some(Grant::allow(1)));
        let on = ov.entries_on(&ResourceRef::workspace(1)).unwrap();
        assert_eq!(on.len(), 2);
        assert!(on.iter().any(|e| e.key == other));
        assert!(on.iter().all(|e| e.key != key));
    }
}
