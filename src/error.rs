//! Error types for pgdrift.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for pgdrift operations.
///
/// Only failures that stop an analysis live here. Problems with individual
/// migration files are collected as [`MigrationIssue`]s instead.
#[derive(Debug, Error)]
pub enum DriftError {
    /// Filesystem failure other than a missing migrations directory.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The live schema snapshot could not be decoded.
    #[error("Invalid schema snapshot {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The migration ledger could not be decoded.
    #[error("Invalid migration ledger {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The configuration file could not be decoded.
    #[error("Configuration error in {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A report or model could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl DriftError {
    /// Wrap an IO error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for pgdrift operations.
pub type DriftResult<T> = Result<T, DriftError>;

/// What is wrong with a migration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    MissingVersion,
    EmptyUp,
    EmptyDown,
    DuplicateVersion,
}

impl IssueKind {
    /// Structural issues make a file invalid; duplicates do not.
    pub const fn is_structural(self) -> bool {
        !matches!(self, Self::DuplicateVersion)
    }
}

/// A problem found in one migration file.
///
/// Issues are reported alongside the loaded migrations and never abort
/// loading the rest of the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationIssue {
    pub filename: String,
    pub version: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl MigrationIssue {
    pub fn new(
        filename: impl Into<String>,
        version: Option<String>,
        kind: IssueKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            version,
            kind,
            message: message.into(),
        }
    }
}
