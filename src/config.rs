//! Configuration loading with layered overrides.
//!
//! Layers are applied in order, later layers winning field by field:
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables (`ACLBIT_` prefix)
//!
//! Each layer is a [`ConfigLayer`] of optional fields and is folded into a
//! [`Config`] with [`Config::merge`], so precedence is explicit.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::ENV_PREFIX;
use crate::error::{AclError, Result};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub transfer: TransferConfig,
}

/// LMDB environment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub map_size: usize,
    pub max_readers: u32,
}

/// Effective-permission cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

/// Bulk import/export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Payloads with more rows are rejected whole
    pub max_rows: usize,
    /// `inheritToChildren` for CSV rows that omit the column
    pub csv_inherit_default: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                path: PathBuf::from("data/acl"),
                map_size: 1 << 30,
                max_readers: 126,
            },
            cache: CacheConfig { enabled: true, capacity: 10_000 },
            transfer: TransferConfig { max_rows: 100_000, csv_inherit_default: true },
        }
    }
}

/// One partial layer of configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub store: StoreLayer,
    #[serde(default)]
    pub cache: CacheLayer,
    #[serde(default)]
    pub transfer: TransferLayer,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreLayer {
    pub path: Option<PathBuf>,
    pub map_size: Option<usize>,
    pub max_readers: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheLayer {
    pub enabled: Option<bool>,
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferLayer {
    pub max_rows: Option<usize>,
    pub csv_inherit_default: Option<bool>,
}

impl ConfigLayer {
    /// Parse a TOML document into a layer.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AclError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AclError::Config(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&content)
    }

    /// Build a layer from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build a layer from `(name, value)` pairs; names without the prefix are ignored.
    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Result<Self> {
        let mut layer = ConfigLayer::default();
        let prefix = format!("{ENV_PREFIX}_");
        for (name, value) in vars {
            let Some(field) = name.strip_prefix(&prefix) else { continue };
            match field {
                "STORE_PATH" => layer.store.path = Some(PathBuf::from(value)),
                "STORE_MAP_SIZE" => layer.store.map_size = Some(parse_var(&name, &value)?),
                "STORE_MAX_READERS" => layer.store.max_readers = Some(parse_var(&name, &value)?),
                "CACHE_ENABLED" => layer.cache.enabled = Some(parse_var(&name, &value)?),
                "CACHE_CAPACITY" => layer.cache.capacity = Some(parse_var(&name, &value)?),
                "TRANSFER_MAX_ROWS" => layer.transfer.max_rows = Some(parse_var(&name, &value)?),
                "TRANSFER_CSV_INHERIT_DEFAULT" => {
                    layer.transfer.csv_inherit_default = Some(parse_var(&name, &value)?)
                }
                _ => {}
            }
        }
        Ok(layer)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AclError::Config(format!("{name}: cannot parse '{value}'")))
}

impl Config {
    /// Fold a layer over this config; every field the layer sets wins.
    pub fn merge(mut self, layer: ConfigLayer) -> Self {
        let ConfigLayer { store, cache, transfer } = layer;
        if let Some(v) = store.path {
            self.store.path = v;
        }
        if let Some(v) = store.map_size {
            self.store.map_size = v;
        }
        if let Some(v) = store.max_readers {
            self.store.max_readers = v;
        }
        if let Some(v) = cache.enabled {
            self.cache.enabled = v;
        }
        if let Some(v) = cache.capacity {
            self.cache.capacity = v;
        }
        if let Some(v) = transfer.max_rows {
            self.transfer.max_rows = v;
        }
        if let Some(v) = transfer.csv_inherit_default {
            self.transfer.csv_inherit_default = v;
        }
        self
    }

    /// Defaults, then the optional file, then the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(path) = config_path {
            config = config.merge(ConfigLayer::from_file(path)?);
        }
        config = config.merge(ConfigLayer::from_env()?);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.map_size == 0 {
            return Err(AclError::Config("store.map_size must be positive".into()));
        }
        if self.transfer.max_rows == 0 {
            return Err(AclError::Config("transfer.max_rows must be positive".into()));
        }
        Ok(())
    }

    /// Defaults with the store rooted at `path`.
    pub fn with_store_path(path: impl Into<PathBuf>) -> Self {
        let mut c = Config::default();
        c.store.path = path.into();
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert!(c.cache.enabled);
        assert!(c.transfer.csv_inherit_default);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[store]
path = "/tmp/acl-test"

[cache]
enabled = false
"#
        )
        .unwrap();

        let c = Config::default().merge(ConfigLayer::from_file(file.path()).unwrap());
        assert_eq!(c.store.path, PathBuf::from("/tmp/acl-test"));
        assert!(!c.cache.enabled);
        // Untouched fields keep their defaults
        assert_eq!(c.cache.capacity, 10_000);
        assert_eq!(c.store.map_size, 1 << 30);
    }

    #[test]
    fn test_later_layer_wins() {
        let file = ConfigLayer::from_toml("[transfer]\nmax_rows = 10\n").unwrap();
        let env = ConfigLayer::from_vars(vec![
            ("ACLBIT_TRANSFER_MAX_ROWS".to_string(), "20".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ])
        .unwrap();
        let c = Config::default().merge(file).merge(env);
        assert_eq!(c.transfer.max_rows, 20);
    }

    #[test]
    fn test_bad_env_value() {
        let r = ConfigLayer::from_vars(vec![("ACLBIT_CACHE_CAPACITY".to_string(), "lots".to_string())]);
        assert!(matches!(r, Err(AclError::Config(_))));
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        assert!(ConfigLayer::from_toml("[cache]\nsize = 3\n").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rows() {
        let c = Config::default().merge(ConfigLayer::from_toml("[transfer]\nmax_rows = 0\n").unwrap());
        assert!(c.validate().is_err());
    }
}
