//! Analysis entry points.
//!
//! Pure, input-driven functions tying the engines together. Each call loads
//! from disk and replays into a fresh model; nothing is cached between calls.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::diff::{DriftReport, diff_schemas};
use crate::error::{DriftResult, IssueKind, MigrationIssue};
use crate::migrate::{
    AppliedMigration, LoadedMigrations, MigrationHistory, MigrationLedger, ReplayStats,
    load_migrations, replay_with_stats,
};
use crate::schema::{SchemaIntrospector, SchemaModel};

/// File-level health of a migrations directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationAnalysis {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub duplicate_versions: Vec<String>,
    pub errors: Vec<MigrationIssue>,
}

impl MigrationAnalysis {
    pub fn is_clean(&self) -> bool {
        self.invalid_files == 0 && self.duplicate_versions.is_empty()
    }
}

impl From<&LoadedMigrations> for MigrationAnalysis {
    fn from(loaded: &LoadedMigrations) -> Self {
        let invalid = loaded.invalid_files().len();
        Self {
            total_files: loaded.migrations.len(),
            valid_files: loaded.migrations.len() - invalid,
            invalid_files: invalid,
            duplicate_versions: loaded.duplicate_versions.clone(),
            errors: loaded.issues.clone(),
        }
    }
}

/// Load a migrations directory and report on its files.
pub fn analyze_migrations(dir: &Path) -> DriftResult<MigrationAnalysis> {
    let loaded = load_migrations(dir)?;
    Ok(MigrationAnalysis::from(&loaded))
}

/// Replay the applied migrations into the expected schema.
///
/// With no ledger every valid migration counts as applied. Replay always
/// runs in ascending version order, whatever order the ledger recorded.
pub fn expected_schema(
    loaded: &LoadedMigrations,
    applied: Option<&[AppliedMigration]>,
) -> (SchemaModel, ReplayStats) {
    let applied_versions: Option<HashSet<&str>> =
        applied.map(|records| records.iter().map(|a| a.version.as_str()).collect());

    let migrations = loaded.valid().into_iter().filter(|m| {
        applied_versions
            .as_ref()
            .is_none_or(|versions| versions.contains(m.version.as_str()))
    });
    replay_with_stats(migrations)
}

/// Everything one drift check produces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftAnalysis {
    pub migrations: MigrationAnalysis,
    /// Present when a ledger was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<MigrationHistory>,
    pub replay: ReplayStats,
    pub drift: DriftReport,
}

/// Load, replay and diff against the live schema.
pub fn analyze_drift(
    dir: &Path,
    ledger: Option<&dyn MigrationLedger>,
    introspector: &dyn SchemaIntrospector,
) -> DriftResult<DriftAnalysis> {
    let loaded = load_migrations(dir)?;
    let applied = ledger.map(|l| l.applied()).transpose()?;

    let history = applied.as_deref().map(|records| loaded.history(records));
    let (expected, replay) = expected_schema(&loaded, applied.as_deref());
    let actual = introspector.introspect()?;
    let drift = diff_schemas(&expected, &actual);

    Ok(DriftAnalysis {
        migrations: MigrationAnalysis::from(&loaded),
        history,
        replay,
        drift,
    })
}

/// Count issues by kind, for summaries.
pub fn issue_counts(issues: &[MigrationIssue]) -> Vec<(IssueKind, usize)> {
    let kinds = [
        IssueKind::MissingVersion,
        IssueKind::EmptyUp,
        IssueKind::EmptyDown,
        IssueKind::DuplicateVersion,
    ];
    kinds
        .into_iter()
        .map(|kind| (kind, issues.iter().filter(|i| i.kind == kind).count()))
        .filter(|(_, n)| *n > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::Migration;
    use chrono::{TimeZone, Utc};

    fn loaded() -> LoadedMigrations {
        LoadedMigrations::from_migrations(vec![
            Migration::new("20240101000000", "users", "CREATE TABLE users (id int)", "DROP TABLE users"),
            Migration::new("20240102000000", "orders", "CREATE TABLE orders (id int)", "DROP TABLE orders"),
            Migration::new("20240103000000", "broken", "CREATE TABLE broken (id int)", ""),
        ])
    }

    #[test]
    fn test_analysis_counts() {
        let analysis = MigrationAnalysis::from(&loaded());
        assert_eq!(analysis.total_files, 3);
        assert_eq!(analysis.valid_files, 2);
        assert_eq!(analysis.invalid_files, 1);
        assert!(!analysis.is_clean());
        assert_eq!(issue_counts(&analysis.errors), vec![(IssueKind::EmptyDown, 1)]);
    }

    #[test]
    fn test_expected_schema_without_ledger_uses_all_valid() {
        let (model, stats) = expected_schema(&loaded(), None);
        assert_eq!(model.tables.sorted_keys(), vec!["public.orders", "public.users"]);
        assert_eq!(stats.migrations, 2);
    }

    #[test]
    fn test_expected_schema_with_ledger() {
        let applied = vec![AppliedMigration::new(
            "20240102000000",
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )];
        let (model, _) = expected_schema(&loaded(), Some(applied.as_slice()));
        assert_eq!(model.tables.sorted_keys(), vec!["public.orders"]);
    }
}
