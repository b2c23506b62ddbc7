//! Transaction wrapper for entry writes

use heed::RwTxn;

use crate::db::Dbs;
use crate::error::{err, Result};
use crate::model::{Entry, EntryKey, Grant, ResourceRef};

/// One LMDB write transaction over the entry table.
/// LMDB admits a single writer, so writes to the same key serialize.
pub struct Tx<'e> {
    txn: RwTxn<'e>,
    dbs: &'e Dbs,
}

impl<'e> Tx<'e> {
    #[inline]
    pub(crate) fn new(txn: RwTxn<'e>, dbs: &'e Dbs) -> Self {
        Tx { txn, dbs }
    }

    #[inline]
    pub(crate) fn commit(self) -> Result<()> {
        self.txn.commit().map_err(err)
    }

    #[inline]
    pub fn get(&self, key: &EntryKey) -> Result<Option<Grant>> {
        self.dbs.entries.get(&self.txn, key)
    }

    /// Insert or replace (never duplicates: the key is the LMDB key)
    #[inline]
    pub fn upsert(&mut self, key: &EntryKey, grant: Grant) -> Result<Entry> {
        self.dbs.entries.put(&mut self.txn, key, &grant)?;
        Ok(Entry { key: *key, grant })
    }

    /// Remove an entry; false if it did not exist
    #[inline]
    pub fn delete(&mut self, key: &EntryKey) -> Result<bool> {
        self.dbs.entries.del(&mut self.txn, key)
    }

    pub fn list_resource(&self, r: &ResourceRef) -> Result<Vec<Entry>> {
        self.dbs.entries.list_resource(&self.txn, r)
    }

    pub(crate) fn clear(&mut self) -> Result<()> {
        self.dbs.entries.fwd.clear(&mut self.txn).map_err(err)?;
        self.dbs.entries.rev.clear(&mut self.txn).map_err(err)
    }
}
