//! pgdrift configuration
//!
//! ```toml
//! [migrations]
//! dir = "db/migrations"
//!
//! [drift]
//! snapshot = "schema.json"
//! ledger = "applied.json"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{DriftError, DriftResult};

/// Project-local config file name.
pub const CONFIG_FILE: &str = "pgdrift.toml";

/// dbmate's default migrations directory.
pub const DEFAULT_MIGRATIONS_DIR: &str = "db/migrations";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub migrations: MigrationsConfig,
    pub drift: DriftConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub dir: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Live schema snapshot (JSON).
    pub snapshot: Option<PathBuf>,
    /// Applied-migrations ledger (JSON).
    pub ledger: Option<PathBuf>,
}

impl Config {
    /// Parse a config file.
    pub fn load(path: &Path) -> DriftResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| DriftError::io(path, e))?;
        toml::from_str(&content).map_err(|source| DriftError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Find and load the config.
    ///
    /// An explicit path must exist. Otherwise `./pgdrift.toml`, then
    /// `<config dir>/pgdrift/config.toml`, then defaults.
    pub fn discover(explicit: Option<&Path>) -> DriftResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("pgdrift").join("config.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                tracing::debug!("Using config {}", path.display());
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }
}
