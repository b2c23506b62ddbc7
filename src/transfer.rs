//! Bulk export and import of entries (JSON or CSV)
//!
//! Import is two-phase: [`Transfer::preview`] classifies every row without
//! writing, [`Transfer::execute`] re-runs the same classification and commits
//! row by row. Rows are independent: a row that fails to parse or resolve is
//! recorded and skipped, the rest of the batch continues, and rows already
//! committed stay committed.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::bits::{self, Mask};
use crate::config::TransferConfig;
use crate::db::EntryStore;
use crate::directory::{MembershipStore, ResourceCatalog};
use crate::error::{AclError, Result};
use crate::hierarchy;
use crate::model::{Entry, EntryKey, EntryRecord, Grant, PrincipalKind, PrincipalRef, ResourceKind, ResourceRef};
use crate::read::{EntryLookup, Overlay};

const CSV_HEADERS: [&str; 8] = [
    "resourceType",
    "resourceId",
    "principalType",
    "principalName",
    "permissions",
    "deny",
    "inheritToChildren",
    "display",
];

// Import needs the leading six; the rest are optional
const CSV_REQUIRED: usize = 6;

/// Interchange format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    Csv,
}

impl FromStr for Format {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "csv" => Ok(Format::Csv),
            other => Err(AclError::Malformed(format!("unknown format '{}'", other))),
        }
    }
}

/// What to do when an imported row hits an existing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Leave the existing entry untouched
    Skip,
    /// Replace its permissions and deny flag
    Overwrite,
    /// OR permissions and deny flags into it
    Merge,
}

impl FromStr for ImportMode {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(ImportMode::Skip),
            "overwrite" => Ok(ImportMode::Overwrite),
            "merge" => Ok(ImportMode::Merge),
            other => Err(AclError::Malformed(format!("unknown import mode '{}'", other))),
        }
    }
}

impl ImportMode {
    /// The entry that should exist after importing `imported` over `existing`.
    /// None means leave the key alone.
    pub fn resolve(self, existing: Option<Grant>, imported: Grant) -> Option<Grant> {
        let Some(cur) = existing else { return Some(imported) };
        let next = match self {
            ImportMode::Skip => return None,
            ImportMode::Overwrite => Grant { permissions: imported.permissions, deny: imported.deny, ..cur },
            ImportMode::Merge => Grant {
                permissions: cur.permissions | imported.permissions,
                deny: cur.deny || imported.deny,
                ..cur
            },
        };
        (next != cur).then_some(next)
    }
}

/// Which entries to export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportScope {
    pub resource_type: Option<ResourceKind>,
    pub resource_id: Option<u64>,
}

impl ExportScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn resource(r: ResourceRef) -> Self {
        ExportScope { resource_type: Some(r.kind), resource_id: r.id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportOutput {
    pub data: String,
    pub count: usize,
}

/// Cooperative cancellation flag shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    Create,
    Update,
    Skip,
    Error,
}

impl fmt::Display for RowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RowAction::Create => "create",
            RowAction::Update => "update",
            RowAction::Skip => "skip",
            RowAction::Error => "error",
        })
    }
}

/// Classification of one input row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRow {
    /// 1-based row number within the payload (header excluded)
    pub line: usize,
    pub resource_type: Option<ResourceKind>,
    pub resource_id: Option<u64>,
    pub principal_name: String,
    pub action: RowAction,
    pub reason: Option<String>,
    #[serde(skip)]
    key: Option<EntryKey>,
    #[serde(skip)]
    imported: Option<Grant>,
    #[serde(skip)]
    write: Option<Grant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub to_create: usize,
    pub to_update: usize,
    pub to_skip: usize,
    pub errors: usize,
    pub entries: Vec<PlannedRow>,
    /// SHA-256 over the classification; hand it back to execute
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    pub line: usize,
    pub action: RowAction,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errored: usize,
    pub cancelled: bool,
    pub rows: Vec<RowOutcome>,
}

// Parsed but not yet classified
struct ParsedRow {
    line: usize,
    key: EntryKey,
    grant: Grant,
    principal_name: String,
}

struct RowError {
    line: usize,
    resource_type: Option<ResourceKind>,
    resource_id: Option<u64>,
    principal_name: String,
    error: AclError,
}

type RowResult = std::result::Result<ParsedRow, RowError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsvRow {
    resource_type: String,
    #[serde(default)]
    resource_id: String,
    principal_type: String,
    principal_name: String,
    permissions: String,
    #[serde(default)]
    deny: String,
    #[serde(default)]
    inherit_to_children: Option<String>,
}

/// Borrowed collaborators for bulk transfer
pub struct Transfer<'a, C: ?Sized, M: ?Sized> {
    catalog: &'a C,
    members: &'a M,
    cfg: &'a TransferConfig,
}

impl<'a, C, M> Transfer<'a, C, M>
where
    C: ResourceCatalog + ?Sized,
    M: MembershipStore + ?Sized,
{
    pub fn new(catalog: &'a C, members: &'a M, cfg: &'a TransferConfig) -> Self {
        Transfer { catalog, members, cfg }
    }

    // ========================================================================
    // Export
    // ========================================================================

    pub fn export(
        &self,
        store: &EntryStore,
        scope: &ExportScope,
        format: Format,
        include_children: bool,
        cancel: &CancelToken,
    ) -> Result<ExportOutput> {
        let entries = self.collect(store, scope, include_children, cancel)?;
        let data = match format {
            Format::Json => {
                let records: Vec<EntryRecord> = entries.iter().map(EntryRecord::from).collect();
                serde_json::to_string_pretty(&records).map_err(|e| AclError::Malformed(e.to_string()))?
            }
            Format::Csv => self.write_csv(&entries)?,
        };
        info!(count = entries.len(), format = ?format, "entries exported");
        Ok(ExportOutput { data, count: entries.len() })
    }

    fn collect(
        &self,
        store: &EntryStore,
        scope: &ExportScope,
        include_children: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<Entry>> {
        if cancel.is_cancelled() {
            return Err(AclError::Cancelled);
        }
        let kind = match scope.resource_type {
            None => return store.list_all(),
            Some(k) => k,
        };
        if scope.resource_id.is_none() && !kind.is_singleton() {
            // Every resource of this kind
            let all = store.list_all()?;
            return Ok(all.into_iter().filter(|e| e.key.resource.kind == kind).collect());
        }
        let root = ResourceRef::new(kind, scope.resource_id)?;
        let resources = if include_children {
            hierarchy::subtree(self.catalog, &root)?
        } else {
            vec![root]
        };
        let snap = store.snapshot()?;
        let mut out = Vec::new();
        for r in &resources {
            if cancel.is_cancelled() {
                return Err(AclError::Cancelled);
            }
            out.extend(snap.entries_on(r)?);
        }
        Ok(out)
    }

    fn write_csv(&self, entries: &[Entry]) -> Result<String> {
        let mut w = csv::Writer::from_writer(Vec::new());
        w.write_record(CSV_HEADERS).map_err(csv_err)?;
        for e in entries {
            let r = e.key.resource;
            let resource_name = self.catalog.display_name(&r).unwrap_or_else(|| r.to_string());
            let perms = e.grant.permissions;
            let display = format!(
                "{} {}: {}{} [{}]",
                r.kind,
                resource_name,
                if e.grant.deny { "deny " } else { "" },
                bits::describe(perms),
                bits::names(perms).join("|")
            );
            w.write_record([
                r.kind.as_str().to_string(),
                r.id.map(|i| i.to_string()).unwrap_or_default(),
                e.key.principal.kind.as_str().to_string(),
                self.principal_label(&e.key.principal),
                perms.to_string(),
                e.grant.deny.to_string(),
                e.grant.inherit_to_children.to_string(),
                display,
            ])
            .map_err(csv_err)?;
        }
        let bytes = w.into_inner().map_err(|e| AclError::Malformed(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| AclError::Malformed(e.to_string()))
    }

    /// Directory name, or `#id` when the principal has none
    fn principal_label(&self, p: &PrincipalRef) -> String {
        self.members.principal_name(p).unwrap_or_else(|| format!("#{}", p.id))
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Classify every row without writing anything
    pub fn preview<L: EntryLookup + ?Sized>(
        &self,
        lookup: &L,
        data: &str,
        format: Format,
        mode: ImportMode,
    ) -> Result<ImportPreview> {
        let rows = self.parse(data, format)?;
        let planned = classify(lookup, rows, mode)?;
        let count = |a: RowAction| planned.iter().filter(|p| p.action == a).count();
        Ok(ImportPreview {
            to_create: count(RowAction::Create),
            to_update: count(RowAction::Update),
            to_skip: count(RowAction::Skip),
            errors: count(RowAction::Error),
            digest: digest(&planned),
            entries: planned,
        })
    }

    /// Re-classify and commit. Each row is its own write transaction.
    /// With `expected_digest`, nothing is written unless the plan still matches.
    /// A failing row is recorded and skipped; a storage failure aborts the call.
    pub fn execute<F: FnMut(&EntryKey)>(
        &self,
        store: &EntryStore,
        data: &str,
        format: Format,
        mode: ImportMode,
        expected_digest: Option<&str>,
        cancel: &CancelToken,
        mut on_commit: F,
    ) -> Result<ImportResult> {
        let rows = self.parse(data, format)?;
        let planned = {
            let snap = store.snapshot()?;
            classify(&snap, rows, mode)?
        };
        if let Some(expected) = expected_digest {
            let actual = digest(&planned);
            if actual != expected {
                return Err(AclError::PlanChanged { expected: expected.to_string(), actual });
            }
        }

        let mut result = ImportResult::default();
        for row in &planned {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let outcome = match (row.action, row.key, row.imported) {
                (RowAction::Create | RowAction::Update, Some(key), Some(imported)) => {
                    match store.update(&key, |cur| mode.resolve(cur, imported).or(cur)) {
                        Ok((before, after)) if before == after => (RowAction::Skip, Some("already up to date".to_string())),
                        Ok((before, _)) => {
                            on_commit(&key);
                            (if before.is_none() { RowAction::Create } else { RowAction::Update }, None)
                        }
                        Err(e) if e.is_row_level() => {
                            warn!(line = row.line, error = %e, "import row failed to commit");
                            (RowAction::Error, Some(e.to_string()))
                        }
                        Err(e) => {
                            let committed = result.created + result.updated;
                            warn!(line = row.line, error = %e, committed, "import aborted");
                            return Err(e);
                        }
                    }
                }
                (action, _, _) => (action, row.reason.clone()),
            };
            match outcome.0 {
                RowAction::Create => result.created += 1,
                RowAction::Update => result.updated += 1,
                RowAction::Skip => result.skipped += 1,
                RowAction::Error => result.errored += 1,
            }
            result.rows.push(RowOutcome { line: row.line, action: outcome.0, reason: outcome.1 });
        }
        info!(
            created = result.created,
            updated = result.updated,
            skipped = result.skipped,
            errored = result.errored,
            cancelled = result.cancelled,
            "import executed"
        );
        Ok(result)
    }

    fn parse(&self, data: &str, format: Format) -> Result<Vec<RowResult>> {
        let rows = match format {
            Format::Json => self.parse_json(data)?,
            Format::Csv => self.parse_csv(data)?,
        };
        if rows.len() > self.cfg.max_rows {
            return Err(AclError::Malformed(format!(
                "{} rows exceeds the limit of {}",
                rows.len(),
                self.cfg.max_rows
            )));
        }
        Ok(rows)
    }

    fn parse_json(&self, data: &str) -> Result<Vec<RowResult>> {
        let values: Vec<serde_json::Value> =
            serde_json::from_str(data).map_err(|e| AclError::Malformed(format!("expected a JSON array: {e}")))?;
        Ok(values
            .into_iter()
            .enumerate()
            .map(|(i, v)| self.json_row(i + 1, v))
            .collect())
    }

    fn json_row(&self, line: usize, v: serde_json::Value) -> RowResult {
        let rec: EntryRecord = serde_json::from_value(v).map_err(|e| RowError {
            line,
            resource_type: None,
            resource_id: None,
            principal_name: String::new(),
            error: AclError::Malformed(e.to_string()),
        })?;
        let principal = PrincipalRef { kind: rec.principal_type, id: rec.principal_id };
        let fail = |error: AclError| RowError {
            line,
            resource_type: Some(rec.resource_type),
            resource_id: rec.resource_id,
            principal_name: principal.to_string(),
            error,
        };
        let resource = ResourceRef::new(rec.resource_type, rec.resource_id).map_err(fail)?;
        let grant = Grant { permissions: rec.permissions, deny: rec.deny, inherit_to_children: rec.inherit_to_children };
        self.check_row(resource, principal, grant).map_err(fail)?;
        Ok(ParsedRow {
            line,
            key: EntryKey::new(resource, principal),
            grant,
            principal_name: self.principal_label(&principal),
        })
    }

    fn parse_csv(&self, data: &str) -> Result<Vec<RowResult>> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(data.as_bytes());
        let headers = rdr.headers().map_err(csv_err)?.clone();
        for required in &CSV_HEADERS[..CSV_REQUIRED] {
            if !headers.iter().any(|h| h == *required) {
                return Err(AclError::Malformed(format!("missing CSV column '{}'", required)));
            }
        }
        let mut out = Vec::new();
        for (i, rec) in rdr.records().enumerate() {
            let line = i + 1;
            let row = rec
                .and_then(|r| r.deserialize::<CsvRow>(Some(&headers)))
                .map_err(|e| RowError {
                    line,
                    resource_type: None,
                    resource_id: None,
                    principal_name: String::new(),
                    error: AclError::Malformed(e.to_string()),
                })
                .and_then(|row| self.csv_row(line, row));
            out.push(row);
        }
        Ok(out)
    }

    fn csv_row(&self, line: usize, row: CsvRow) -> RowResult {
        let resource_type = row.resource_type.parse().ok();
        let resource_id = row.resource_id.parse().ok();
        let principal_name = row.principal_name.clone();
        self.csv_fields(line, row)
            .map_err(|error| RowError { line, resource_type, resource_id, principal_name, error })
    }

    fn csv_fields(&self, line: usize, row: CsvRow) -> Result<ParsedRow> {
        let kind: ResourceKind = row.resource_type.parse()?;
        let resource = self.resolve_resource(kind, &row.resource_id)?;
        let principal = self.resolve_principal(row.principal_type.parse()?, &row.principal_name)?;
        let permissions: Mask = row
            .permissions
            .parse()
            .map_err(|_| AclError::Malformed(format!("permissions '{}' is not a number", row.permissions)))?;
        let deny = parse_bool(&row.deny, false)?;
        let inherit_to_children = match row.inherit_to_children.as_deref() {
            Some(v) => parse_bool(v, self.cfg.csv_inherit_default)?,
            None => self.cfg.csv_inherit_default,
        };
        let grant = Grant { permissions, deny, inherit_to_children };
        self.check_row(resource, principal, grant)?;
        Ok(ParsedRow { line, key: EntryKey::new(resource, principal), grant, principal_name: row.principal_name })
    }

    /// Empty id for singletons, a numeric id, or a display name
    fn resolve_resource(&self, kind: ResourceKind, id: &str) -> Result<ResourceRef> {
        if id.is_empty() {
            return ResourceRef::new(kind, None);
        }
        if let Ok(n) = id.parse::<u64>() {
            return ResourceRef::new(kind, Some(n));
        }
        self.catalog
            .find_by_name(kind, id)
            .ok_or_else(|| AclError::UnknownResource(format!("{} '{}'", kind, id)))
    }

    /// A directory name, or `#id`. The name lookup runs first, so a principal
    /// literally named `#7` resolves to itself rather than to id 7.
    fn resolve_principal(&self, kind: PrincipalKind, name: &str) -> Result<PrincipalRef> {
        if let Some(p) = self.members.find_principal(kind, name) {
            return Ok(p);
        }
        name.strip_prefix('#')
            .and_then(|s| s.parse::<u64>().ok())
            .map(|id| PrincipalRef { kind, id })
            .ok_or_else(|| AclError::UnknownPrincipal(format!("{} '{}'", kind, name)))
    }

    fn check_row(&self, resource: ResourceRef, principal: PrincipalRef, grant: Grant) -> Result<()> {
        bits::validate(grant.permissions)?;
        if !self.catalog.exists(&resource) {
            return Err(AclError::UnknownResource(resource.to_string()));
        }
        if self.members.principal_name(&principal).is_none() {
            return Err(AclError::UnknownPrincipal(principal.to_string()));
        }
        Ok(())
    }
}

fn parse_bool(v: &str, default: bool) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(AclError::Malformed(format!("'{}' is not a boolean", other))),
    }
}

fn csv_err(e: csv::Error) -> AclError {
    AclError::Malformed(e.to_string())
}

/// Classify rows in order. Earlier rows' planned writes are visible to later
/// rows, so duplicate keys in one payload resolve the same way on commit.
fn classify<L: EntryLookup + ?Sized>(lookup: &L, rows: Vec<RowResult>, mode: ImportMode) -> Result<Vec<PlannedRow>> {
    let mut overlay = Overlay::new(lookup);
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                warn!(line = e.line, error = %e.error, "import row rejected");
                out.push(PlannedRow {
                    line: e.line,
                    resource_type: e.resource_type,
                    resource_id: e.resource_id,
                    principal_name: e.principal_name,
                    action: RowAction::Error,
                    reason: Some(e.error.to_string()),
                    key: None,
                    imported: None,
                    write: None,
                });
                continue;
            }
        };
        let existing = overlay.lookup(&row.key)?;
        let write = mode.resolve(existing, row.grant);
        let (action, reason) = match (existing, write) {
            (None, _) => (RowAction::Create, None),
            (Some(_), Some(_)) => (RowAction::Update, None),
            (Some(_), None) if mode == ImportMode::Skip => (RowAction::Skip, Some("entry exists".to_string())),
            (Some(_), None) => (RowAction::Skip, Some("already up to date".to_string())),
        };
        if let Some(g) = write {
            overlay.upsert(row.key, g);
        }
        out.push(PlannedRow {
            line: row.line,
            resource_type: Some(row.key.resource.kind),
            resource_id: row.key.resource.id,
            principal_name: row.principal_name,
            action,
            reason,
            key: Some(row.key),
            imported: Some(row.grant),
            write,
        });
    }
    Ok(out)
}

fn digest(planned: &[PlannedRow]) -> String {
    let mut h = Sha256::new();
    for p in planned {
        h.update((p.line as u64).to_be_bytes());
        h.update(p.action.to_string().as_bytes());
        if let Some(k) = &p.key {
            h.update(crate::keys::forward_key(k));
        }
        if let Some(g) = &p.write {
            h.update(crate::keys::pack(g).to_be_bytes());
        }
        h.update([0u8]);
    }
    h.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}
