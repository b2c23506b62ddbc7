//! Entry store: the persisted access-control table on LMDB

use heed::types::{Bytes, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tracing::debug;

use crate::config::StoreConfig;
use crate::constants::{DB_BY_PRINCIPAL, DB_ENTRIES};
use crate::error::{err, Result};
use crate::keys::{decode_forward, decode_reverse, forward_key, pack, principal_key, resource_key, reverse_key, unpack};
use crate::model::{Entry, EntryKey, Grant, PrincipalRef, ResourceRef};
use crate::read::Snapshot;
use crate::tx::Tx;

pub type Db = Database<Bytes, U64<byteorder::BigEndian>>;

/// Bidirectional index: fwd[resource,principal] and rev[principal,resource] stay in sync
pub struct BiPair {
    pub fwd: Db,
    pub rev: Db,
}

impl BiPair {
    #[inline]
    pub fn get(&self, tx: &RoTxn, key: &EntryKey) -> Result<Option<Grant>> {
        Ok(self.fwd.get(tx, &forward_key(key)).map_err(err)?.map(unpack))
    }

    #[inline]
    pub fn put(&self, tx: &mut RwTxn, key: &EntryKey, g: &Grant) -> Result<()> {
        let v = pack(g);
        self.fwd.put(tx, &forward_key(key), &v).map_err(err)?;
        self.rev.put(tx, &reverse_key(key), &v).map_err(err)
    }

    #[inline]
    pub fn del(&self, tx: &mut RwTxn, key: &EntryKey) -> Result<bool> {
        let r = self.fwd.delete(tx, &forward_key(key)).map_err(err)?;
        self.rev.delete(tx, &reverse_key(key)).map_err(err)?;
        Ok(r)
    }

    pub fn list_resource(&self, tx: &RoTxn, r: &ResourceRef) -> Result<Vec<Entry>> {
        Self::list_pfx(tx, &self.fwd, &resource_key(r), decode_forward)
    }

    pub fn list_principal(&self, tx: &RoTxn, p: &PrincipalRef) -> Result<Vec<Entry>> {
        Self::list_pfx(tx, &self.rev, &principal_key(p), decode_reverse)
    }

    pub fn list_all(&self, tx: &RoTxn) -> Result<Vec<Entry>> {
        let mut r = Vec::new();
        for item in self.fwd.iter(tx).map_err(err)? {
            let (k, v) = item.map_err(err)?;
            if let Some(key) = decode_forward(k) {
                r.push(Entry { key, grant: unpack(v) });
            }
        }
        Ok(r)
    }

    fn list_pfx(tx: &RoTxn, db: &Db, pfx: &[u8], decode: fn(&[u8]) -> Option<EntryKey>) -> Result<Vec<Entry>> {
        let mut r = Vec::new();
        for item in db.prefix_iter(tx, pfx).map_err(err)? {
            let (k, v) = item.map_err(err)?;
            if let Some(key) = decode(k) {
                r.push(Entry { key, grant: unpack(v) });
            }
        }
        Ok(r)
    }
}

/// All database handles
pub struct Dbs {
    pub entries: BiPair,
}

/// The persisted entry table. One LMDB write transaction per mutation.
pub struct EntryStore {
    env: Env,
    dbs: Dbs,
}

impl EntryStore {
    /// Open (creating if needed) the store described by `cfg`
    pub fn open(cfg: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.path).map_err(err)?;
        // SAFETY: LMDB requires no other process to open this path with different options concurrently.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(cfg.map_size)
                .max_readers(cfg.max_readers)
                .max_dbs(2)
                .open(&cfg.path)
                .map_err(err)?
        };
        let mut tx = env.write_txn().map_err(err)?;
        let dbs = Dbs {
            entries: BiPair {
                fwd: env.create_database(&mut tx, Some(DB_ENTRIES)).map_err(err)?,
                rev: env.create_database(&mut tx, Some(DB_BY_PRINCIPAL)).map_err(err)?,
            },
        };
        tx.commit().map_err(err)?;
        debug!(path = %cfg.path.display(), "entry store opened");
        Ok(EntryStore { env, dbs })
    }

    /// A consistent read view over the table
    pub fn snapshot(&self) -> Result<Snapshot<'_>> {
        Ok(Snapshot::new(self.env.read_txn().map_err(err)?, &self.dbs))
    }

    fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        f(&self.dbs, &self.env.read_txn().map_err(err)?)
    }

    /// Run operations in a single write transaction; commits only on Ok
    pub fn transact<T, F: FnOnce(&mut Tx<'_>) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut tx = Tx::new(self.env.write_txn().map_err(err)?, &self.dbs);
        let r = f(&mut tx)?;
        tx.commit()?;
        Ok(r)
    }

    pub fn get(&self, key: &EntryKey) -> Result<Option<Entry>> {
        self.read(|d, tx| Ok(d.entries.get(tx, key)?.map(|grant| Entry { key: *key, grant })))
    }

    /// Insert or replace the entry at `key`
    pub fn upsert(&self, key: &EntryKey, grant: Grant) -> Result<Entry> {
        check_key(key)?;
        crate::bits::validate(grant.permissions)?;
        self.transact(|tx| tx.upsert(key, grant))
    }

    /// Read-modify-write of one key in one transaction.
    /// `f` sees the current grant and returns the new one (None deletes).
    /// Returns (before, after).
    pub fn update<F>(&self, key: &EntryKey, f: F) -> Result<(Option<Grant>, Option<Grant>)>
    where
        F: FnOnce(Option<Grant>) -> Option<Grant>,
    {
        check_key(key)?;
        self.transact(|tx| {
            let before = tx.get(key)?;
            let after = f(before);
            match after {
                Some(g) => {
                    crate::bits::validate(g.permissions)?;
                    tx.upsert(key, g)?;
                }
                None => {
                    tx.delete(key)?;
                }
            }
            Ok((before, after))
        })
    }

    /// Delete the entry at `key`. Deleting a missing key is a no-op.
    pub fn delete(&self, key: &EntryKey) -> Result<bool> {
        self.transact(|tx| tx.delete(key))
    }

    pub fn list_for_resource(&self, r: &ResourceRef) -> Result<Vec<Entry>> {
        self.read(|d, tx| d.entries.list_resource(tx, r))
    }

    pub fn list_for_principal(&self, p: &PrincipalRef) -> Result<Vec<Entry>> {
        self.read(|d, tx| d.entries.list_principal(tx, p))
    }

    pub fn list_all(&self) -> Result<Vec<Entry>> {
        self.read(|d, tx| d.entries.list_all(tx))
    }

    pub fn count(&self) -> Result<u64> {
        self.read(|d, tx| d.entries.fwd.len(tx).map_err(err))
    }

    /// Delete every entry scoped to any of `resources`, all in one transaction
    pub fn delete_for_resources(&self, resources: &[ResourceRef]) -> Result<usize> {
        self.transact(|tx| {
            let mut n = 0;
            for r in resources {
                for e in tx.list_resource(r)? {
                    if tx.delete(&e.key)? {
                        n += 1;
                    }
                }
            }
            Ok(n)
        })
    }

    /// Clear all entries (for testing)
    pub fn clear(&self) -> Result<()> {
        self.transact(|tx| tx.clear())
    }
}

fn check_key(key: &EntryKey) -> Result<()> {
    key.resource.validate()
}
