//! Configuration management.

use crate::models::BackendKind;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration for orgdeep.
#[derive(Debug, Clone)]
pub struct OrgdeepConfig {
    /// Path to the `SQLite` database.
    pub db_path: PathBuf,
    /// Backend used by deep-read queries that do not pick one.
    pub default_backend: BackendKind,
    /// Capacity of the relation read cache (0 disables it).
    pub cache_capacity: usize,
    /// Default retention count for `prune`.
    pub prune_keep: usize,
}

impl Default for OrgdeepConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".orgdeep/orgdeep.db"),
            default_backend: BackendKind::Edges,
            cache_capacity: 1024,
            prune_keep: 2,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Database path.
    pub db_path: Option<String>,
    /// Default deep-read backend.
    pub default_backend: Option<String>,
    /// Relation cache capacity.
    pub cache_capacity: Option<usize>,
    /// Default prune retention count.
    pub prune_keep: Option<usize>,
}

impl OrgdeepConfig {
    /// Loads configuration, layering file values and environment overrides
    /// over the defaults.
    ///
    /// Resolution order, weakest first: built-in defaults, the TOML file (if
    /// a path was given, it must exist; otherwise `orgdeep.toml` is read
    /// when present), then `ORGDEEP_DB` / `ORGDEEP_BACKEND` from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unreadable or malformed file,
    /// or an unknown backend name.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        let file = match config_path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                Error::InvalidInput(format!("cannot read config file '{path}': {e}"))
            })?),
            None => std::fs::read_to_string("orgdeep.toml").ok(),
        };
        if let Some(raw) = file {
            let parsed: ConfigFile = toml::from_str(&raw)
                .map_err(|e| Error::InvalidInput(format!("invalid config file: {e}")))?;
            config.apply_file(&parsed)?;
        }

        if let Ok(db) = std::env::var("ORGDEEP_DB") {
            config.db_path = PathBuf::from(db);
        }
        if let Ok(backend) = std::env::var("ORGDEEP_BACKEND") {
            config.default_backend = BackendKind::parse(&backend)?;
        }

        Ok(config)
    }

    /// Applies the values present in a parsed config file.
    fn apply_file(&mut self, file: &ConfigFile) -> Result<()> {
        if let Some(db_path) = &file.db_path {
            self.db_path = PathBuf::from(db_path);
        }
        if let Some(backend) = &file.default_backend {
            self.default_backend = BackendKind::parse(backend)?;
        }
        if let Some(capacity) = file.cache_capacity {
            self.cache_capacity = capacity;
        }
        if let Some(keep) = file.prune_keep {
            self.prune_keep = keep.max(1);
        }
        Ok(())
    }
}
