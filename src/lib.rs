//! aclbit - Access control resolution with bitmask entries
//!
//! Entries grant or deny a five-bit mask to a user or group on a resource.
//! Effective permissions combine direct, group and inherited entries along
//! the resource tree; deny wins bit-for-bit. Changes can be simulated before
//! they are committed, and entries move in bulk as JSON or CSV.

pub mod bits;
pub mod cache;
pub mod calc;
pub mod config;
pub mod constants;
pub mod db;
pub mod directory;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod keys;
pub mod model;
pub mod read;
pub mod simulate;
pub mod transfer;
pub mod tx;

pub use bits::{
    apply, combine, describe, has_bit, preset_name, Mask, Preset, ALL_BITS, DELETE, EXECUTE, MANAGE_PERMISSIONS, READ,
    WRITE,
};
pub use calc::{Calculation, Calculator, EffectiveResult, SourcedEntry};
pub use config::{CacheConfig, Config, ConfigLayer, StoreConfig, TransferConfig};
pub use db::EntryStore;
pub use directory::{MembershipStore, MemoryCatalog, MemoryDirectory, PrincipalResolver, ResourceCatalog};
pub use engine::AccessControl;
pub use error::{AclError, Result};
pub use model::{Entry, EntryKey, EntryRecord, Grant, PrincipalKind, PrincipalRef, ResourceKind, ResourceRef};
pub use read::{EntryLookup, MemoryEntries, Overlay, Snapshot};
pub use simulate::{ActionKind, Change, Impact, ImpactSummary, PrincipalImpact, SimulationResult, Simulator, Warning};
pub use transfer::{
    CancelToken, ExportOutput, ExportScope, Format, ImportMode, ImportPreview, ImportResult, PlannedRow, RowAction,
    RowOutcome, Transfer,
};
pub use tx::Tx;
