//! Migration history against the applied-migrations ledger.
//!
//! The ledger itself lives in the database and is read by someone else.
//! This module only needs `{version, appliedAt}` pairs, supplied through
//! [`MigrationLedger`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::file::{LoadedMigrations, Migration};
use crate::error::{DriftError, DriftResult};

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigration {
    pub version: String,
    pub applied_at: DateTime<Utc>,
}

impl AppliedMigration {
    pub fn new(version: impl Into<String>, applied_at: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            applied_at,
        }
    }
}

/// Source of applied-migration records.
pub trait MigrationLedger {
    fn applied(&self) -> DriftResult<Vec<AppliedMigration>>;
}

impl MigrationLedger for [AppliedMigration] {
    fn applied(&self) -> DriftResult<Vec<AppliedMigration>> {
        Ok(self.to_vec())
    }
}

impl MigrationLedger for Vec<AppliedMigration> {
    fn applied(&self) -> DriftResult<Vec<AppliedMigration>> {
        Ok(self.clone())
    }
}

/// A ledger exported as a JSON array of `{"version", "appliedAt"}` objects.
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
}

impl LedgerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MigrationLedger for LedgerFile {
    fn applied(&self) -> DriftResult<Vec<AppliedMigration>> {
        let content = fs::read_to_string(&self.path).map_err(|e| DriftError::io(&self.path, e))?;
        serde_json::from_str(&content).map_err(|source| DriftError::Ledger {
            path: self.path.clone(),
            source,
        })
    }
}

/// Pending migrations, the annotated chain, and the most recent application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationHistory {
    /// Valid migrations whose version is not in the ledger.
    pub pending: Vec<Migration>,
    /// Every valid migration, with `applied_at` filled in where known.
    pub migration_chain: Vec<Migration>,
    /// Version of the entry applied most recently by timestamp.
    ///
    /// This can differ from the highest applied version when migrations
    /// were applied out of order.
    pub last_applied_version: Option<String>,
    /// Ledger versions with no migration file.
    pub missing_files: Vec<String>,
}

impl MigrationHistory {
    pub fn applied_count(&self) -> usize {
        self.migration_chain
            .iter()
            .filter(|m| m.applied_at.is_some())
            .count()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Partition valid migrations into pending and applied.
pub fn migration_history<'a>(
    migrations: impl IntoIterator<Item = &'a Migration>,
    applied: &[AppliedMigration],
) -> MigrationHistory {
    let applied_at: HashMap<&str, DateTime<Utc>> = applied
        .iter()
        .map(|a| (a.version.as_str(), a.applied_at))
        .collect();

    let mut history = MigrationHistory::default();
    let mut on_disk = HashSet::new();
    for migration in migrations {
        on_disk.insert(migration.version.clone());
        let mut entry = migration.clone();
        entry.applied_at = applied_at.get(migration.version.as_str()).copied();
        if entry.applied_at.is_none() {
            history.pending.push(migration.clone());
        }
        history.migration_chain.push(entry);
    }

    history.last_applied_version = history
        .migration_chain
        .iter()
        .filter_map(|m| m.applied_at.map(|at| (at, &m.version)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, version)| version.clone());

    let mut missing: Vec<String> = applied
        .iter()
        .filter(|a| !on_disk.contains(&a.version))
        .map(|a| a.version.clone())
        .collect();
    missing.sort();
    missing.dedup();
    for version in &missing {
        tracing::warn!("Applied migration {} has no file on disk", version);
    }
    history.missing_files = missing;

    history
}

impl LoadedMigrations {
    /// History over the valid migrations.
    pub fn history(&self, applied: &[AppliedMigration]) -> MigrationHistory {
        migration_history(self.valid(), applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
    }

    fn migrations() -> Vec<Migration> {
        ["20240101000000", "20240102000000", "20240103000000"]
            .iter()
            .map(|v| Migration::new(*v, "m", "SELECT 1", "SELECT 1"))
            .collect()
    }

    #[test]
    fn test_pending_and_chain() {
        let migrations = migrations();
        let applied = vec![AppliedMigration::new("20240101000000", at(1))];
        let history = migration_history(&migrations, &applied);

        assert_eq!(history.migration_chain.len(), 3);
        assert_eq!(history.applied_count(), 1);
        let pending: Vec<&str> = history.pending.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(pending, vec!["20240102000000", "20240103000000"]);
        assert_eq!(history.migration_chain[0].applied_at, Some(at(1)));
        assert!(!history.is_up_to_date());
    }

    #[test]
    fn test_last_applied_is_by_timestamp_not_version() {
        let migrations = migrations();
        let applied = vec![
            AppliedMigration::new("20240101000000", at(1)),
            AppliedMigration::new("20240103000000", at(2)),
            // Applied last, but it is not the highest version.
            AppliedMigration::new("20240102000000", at(9)),
        ];
        let history = migration_history(&migrations, &applied);

        assert_eq!(history.last_applied_version.as_deref(), Some("20240102000000"));
        assert!(history.is_up_to_date());
    }

    #[test]
    fn test_missing_files() {
        let migrations = migrations();
        let applied = vec![AppliedMigration::new("20231231000000", at(1))];
        let history = migration_history(&migrations, &applied);

        assert_eq!(history.missing_files, vec!["20231231000000"]);
        assert_eq!(history.last_applied_version, None);
    }

    #[test]
    fn test_slice_ledger() {
        let records = vec![AppliedMigration::new("20240101000000", at(1))];
        let ledger: &[AppliedMigration] = &records;
        assert_eq!(ledger.applied().unwrap(), records);
    }

    #[test]
    fn test_ledger_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(
            &path,
            r#"[{"version": "20240101000000", "appliedAt": "2024-06-01T12:00:00Z"}]"#,
        )
        .unwrap();

        let applied = LedgerFile::new(&path).applied().unwrap();
        assert_eq!(applied, vec![AppliedMigration::new("20240101000000", at(1))]);
    }
}
