//! Engine-wide limits and storage layout constants

// Longest ancestor chain the fixed taxonomy allows (feature -> project -> workspace -> root),
// plus one hop of headroom for a misbehaving catalog
pub const MAX_HIERARCHY_DEPTH: usize = 4;

// LMDB sub-database names
pub const DB_ENTRIES: &str = "entries";
pub const DB_BY_PRINCIPAL: &str = "by_principal";

// Packed value layout: low byte = mask, then flag bits
pub const FLAG_DENY: u64 = 1 << 8;
pub const FLAG_INHERIT: u64 = 1 << 9;

// Encoded key halves: kind tag + big-endian id
pub const RESOURCE_KEY_LEN: usize = 9;
pub const PRINCIPAL_KEY_LEN: usize = 9;
pub const ENTRY_KEY_LEN: usize = RESOURCE_KEY_LEN + PRINCIPAL_KEY_LEN;

// Environment variable prefix for config overrides
pub const ENV_PREFIX: &str = "ACLBIT";
