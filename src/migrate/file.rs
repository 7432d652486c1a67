//! Migration file discovery and parsing
//!
//! Migrations follow the dbmate convention: one `.sql` file per version,
//! named `{YYYYMMDDHHMMSS}_{name}.sql`, with the forward and rollback SQL
//! in one file:
//!
//! ```sql
//! -- migrate:up
//! CREATE TABLE users (id bigserial PRIMARY KEY);
//!
//! -- migrate:down
//! DROP TABLE users;
//! ```

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, DriftResult, IssueKind, MigrationIssue};

/// Marker line that opens the forward section.
pub const UP_MARKER: &str = "-- migrate:up";

/// Marker line that opens the rollback section.
pub const DOWN_MARKER: &str = "-- migrate:down";

/// Width of a migration version (`YYYYMMDDHHMMSS`).
pub const VERSION_WIDTH: usize = 14;

static FILENAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{14})_(.+)\.sql$").unwrap());

/// A migration loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    /// Fixed-width timestamp; string order is version order.
    pub version: String,
    pub name: String,
    pub filename: String,
    pub up_sql: String,
    pub down_sql: String,
    /// When the ledger says this version was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl Migration {
    pub fn new(
        version: impl Into<String>,
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        let version = version.into();
        let name = name.into();
        Self {
            filename: format!("{}_{}.sql", version, name),
            version,
            name,
            up_sql: up_sql.into(),
            down_sql: down_sql.into(),
            applied_at: None,
        }
    }

    /// Check the structural rules every migration must satisfy.
    pub fn validate(&self) -> Vec<MigrationIssue> {
        let mut issues = Vec::new();
        let version = Some(self.version.clone()).filter(|v| !v.is_empty());

        if !is_valid_version(&self.version) {
            issues.push(MigrationIssue::new(
                &self.filename,
                version.clone(),
                IssueKind::MissingVersion,
                format!(
                    "Migration '{}' has no {}-digit version",
                    self.filename, VERSION_WIDTH
                ),
            ));
        }
        if self.up_sql.trim().is_empty() {
            issues.push(MigrationIssue::new(
                &self.filename,
                version.clone(),
                IssueKind::EmptyUp,
                format!("Migration '{}' has an empty '{}' section", self.filename, UP_MARKER),
            ));
        }
        if self.down_sql.trim().is_empty() {
            issues.push(MigrationIssue::new(
                &self.filename,
                version,
                IssueKind::EmptyDown,
                format!("Migration '{}' has an empty '{}' section", self.filename, DOWN_MARKER),
            ));
        }
        issues
    }
}

fn is_valid_version(version: &str) -> bool {
    version.len() == VERSION_WIDTH && version.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a migration filename into `(version, name)`.
///
/// Expected format: `{YYYYMMDDHHMMSS}_{name}.sql`
///
/// # Example
/// - `20240120120000_create_users.sql` → `("20240120120000", "create_users")`
pub fn parse_filename(filename: &str) -> Option<(String, String)> {
    let caps = FILENAME.captures(filename)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// The two sections of a migration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationContent {
    pub up_sql: String,
    pub down_sql: String,
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Split file content into its up and down sections.
///
/// Everything before the first marker is discarded. A marker line may carry
/// dbmate options after it (`-- migrate:up transaction:false`).
pub fn parse_migration_content(content: &str) -> MigrationContent {
    let mut section = Section::Preamble;
    let mut up = String::new();
    let mut down = String::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if is_marker(trimmed, UP_MARKER) {
            section = Section::Up;
            continue;
        }
        if is_marker(trimmed, DOWN_MARKER) {
            section = Section::Down;
            continue;
        }
        let target = match section {
            Section::Preamble => continue,
            Section::Up => &mut up,
            Section::Down => &mut down,
        };
        target.push_str(line);
        target.push('\n');
    }

    MigrationContent {
        up_sql: up.trim().to_string(),
        down_sql: down.trim().to_string(),
    }
}

fn is_marker(line: &str, marker: &str) -> bool {
    match line.strip_prefix(marker) {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

/// Render file content with both markers.
pub fn format_migration_content(up_sql: &str, down_sql: &str) -> String {
    format!(
        "{}\n{}\n\n{}\n{}\n",
        UP_MARKER,
        up_sql.trim(),
        DOWN_MARKER,
        down_sql.trim()
    )
}

/// Current UTC time as a migration version (`YYYYMMDDHHMMSS`).
pub fn generate_timestamp() -> String {
    timestamp_at(Utc::now())
}

pub fn timestamp_at(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Lower-case a name and replace every non-alphanumeric with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Filename for a new migration created now.
pub fn generate_filename(name: &str) -> String {
    migration_filename(&generate_timestamp(), name)
}

pub fn migration_filename(version: &str, name: &str) -> String {
    format!("{}_{}.sql", version, sanitize_name(name))
}

/// Write a new migration file and return its path.
///
/// Creates the directory if needed. An existing file with the same name is
/// overwritten; callers own timestamp uniqueness.
pub fn create_migration(
    dir: &Path,
    name: &str,
    up_sql: &str,
    down_sql: &str,
) -> DriftResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| DriftError::io(dir, e))?;
    let path = dir.join(generate_filename(name));
    fs::write(&path, format_migration_content(up_sql, down_sql))
        .map_err(|e| DriftError::io(&path, e))?;
    tracing::info!("Created migration {}", path.display());
    Ok(path)
}

/// Everything found in a migrations directory.
#[derive(Debug, Clone, Default)]
pub struct LoadedMigrations {
    /// Every matching file, sorted by version. Includes invalid files and
    /// all members of a duplicate-version group.
    pub migrations: Vec<Migration>,
    /// Structural and duplicate-version issues, in file order.
    pub issues: Vec<MigrationIssue>,
    /// Versions shared by more than one file, sorted.
    pub duplicate_versions: Vec<String>,
}

impl LoadedMigrations {
    /// Build from already-parsed migrations: sort, validate, find duplicates.
    pub fn from_migrations(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.filename.cmp(&b.filename))
        });

        let mut issues: Vec<MigrationIssue> =
            migrations.iter().flat_map(Migration::validate).collect();

        let mut by_version: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for m in &migrations {
            by_version
                .entry(m.version.as_str())
                .or_default()
                .push(m.filename.as_str());
        }
        let mut duplicate_versions = Vec::new();
        for (version, files) in by_version.into_iter().filter(|(_, f)| f.len() > 1) {
            tracing::warn!("Duplicate migration version {}: {}", version, files.join(", "));
            issues.push(MigrationIssue::new(
                files.join(", "),
                Some(version.to_string()),
                IssueKind::DuplicateVersion,
                format!(
                    "Version {} is used by {} files: {}",
                    version,
                    files.len(),
                    files.join(", ")
                ),
            ));
            duplicate_versions.push(version.to_string());
        }

        Self {
            migrations,
            issues,
            duplicate_versions,
        }
    }

    /// Filenames with at least one structural issue.
    pub fn invalid_files(&self) -> HashSet<&str> {
        self.issues
            .iter()
            .filter(|issue| issue.kind.is_structural())
            .map(|issue| issue.filename.as_str())
            .collect()
    }

    /// Migrations without structural issues, in version order.
    pub fn valid(&self) -> Vec<&Migration> {
        let invalid = self.invalid_files();
        self.migrations
            .iter()
            .filter(|m| !invalid.contains(m.filename.as_str()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Load every migration file in `dir`.
///
/// A missing directory is an empty result, not an error. Other filesystem
/// failures propagate. Files that do not match the naming pattern are
/// skipped; files that match but fail validation are kept and reported.
pub fn load_migrations(dir: &Path) -> DriftResult<LoadedMigrations> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!("Migrations directory {} does not exist", dir.display());
            return Ok(LoadedMigrations::default());
        }
        Err(e) => return Err(DriftError::io(dir, e)),
    };

    let mut migrations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DriftError::io(dir, e))?;
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((version, name)) = parse_filename(filename) else {
            tracing::debug!("Skipping non-migration file {}", filename);
            continue;
        };
        if !path.is_file() {
            continue;
        }

        let bytes = fs::read(&path).map_err(|e| DriftError::io(&path, e))?;
        let content = String::from_utf8_lossy(&bytes);
        if let Cow::Owned(_) = content {
            tracing::warn!("{} is not valid UTF-8; invalid bytes replaced", filename);
        }
        let MigrationContent { up_sql, down_sql } = parse_migration_content(&content);
        migrations.push(Migration {
            version,
            name,
            filename: filename.to_string(),
            up_sql,
            down_sql,
            applied_at: None,
        });
    }

    let loaded = LoadedMigrations::from_migrations(migrations);
    for issue in loaded.issues.iter().filter(|i| i.kind.is_structural()) {
        tracing::warn!("{}", issue.message);
    }
    tracing::info!(
        "Loaded {} migration(s) from {} ({} issue(s))",
        loaded.migrations.len(),
        dir.display(),
        loaded.issues.len()
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("20240120120000_create_users.sql"),
            Some(("20240120120000".to_string(), "create_users".to_string()))
        );
        assert_eq!(parse_filename("2024012012000_short.sql"), None);
        assert_eq!(parse_filename("20240120120000_create_users.rs"), None);
        assert_eq!(parse_filename("20240120120000_.sql"), None);
        assert_eq!(parse_filename("schema.sql"), None);
    }

    #[test]
    fn test_parse_content_discards_preamble() {
        let content = "-- generated by hand\nSELECT 1;\n-- migrate:up\nCREATE TABLE a (id int);\n\n-- migrate:down\nDROP TABLE a;\n";
        let parsed = parse_migration_content(content);
        assert_eq!(parsed.up_sql, "CREATE TABLE a (id int);");
        assert_eq!(parsed.down_sql, "DROP TABLE a;");
    }

    #[test]
    fn test_parse_content_with_marker_options() {
        let content = "-- migrate:up transaction:false\nCREATE INDEX CONCURRENTLY i ON t (c);\n-- migrate:down\nDROP INDEX i;";
        let parsed = parse_migration_content(content);
        assert_eq!(parsed.up_sql, "CREATE INDEX CONCURRENTLY i ON t (c);");
    }

    #[test]
    fn test_parse_content_without_down() {
        let parsed = parse_migration_content("-- migrate:up\nCREATE TABLE a (id int);");
        assert_eq!(parsed.down_sql, "");
    }

    #[test]
    fn test_format_roundtrip() {
        let up = "  CREATE TABLE a (id int);\n";
        let down = "DROP TABLE a;";
        let content = format_migration_content(up, down);

        assert_eq!(content.matches(UP_MARKER).count(), 1);
        assert_eq!(content.matches(DOWN_MARKER).count(), 1);
        let parsed = parse_migration_content(&content);
        assert_eq!(parsed.up_sql, up.trim());
        assert_eq!(parsed.down_sql, down.trim());
    }

    #[test]
    fn test_sanitize_and_filename() {
        assert_eq!(sanitize_name("Add Users-Table!"), "add_users_table_");
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(timestamp_at(at), "20240305070809");
        assert_eq!(
            migration_filename(&timestamp_at(at), "Add Users"),
            "20240305070809_add_users.sql"
        );
    }

    #[test]
    fn test_generated_filename_parses() {
        let filename = generate_filename("create orders");
        let (version, name) = parse_filename(&filename).unwrap();
        assert_eq!(version.len(), VERSION_WIDTH);
        assert_eq!(name, "create_orders");
    }

    #[test]
    fn test_validate() {
        let ok = Migration::new("20240101000000", "a", "CREATE TABLE a (id int)", "DROP TABLE a");
        assert!(ok.validate().is_empty());

        let bad = Migration::new("2024", "b", "  ", "");
        let kinds: Vec<IssueKind> = bad.validate().iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![IssueKind::MissingVersion, IssueKind::EmptyUp, IssueKind::EmptyDown]
        );
    }

    #[test]
    fn test_duplicates_are_reported_and_kept() {
        let loaded = LoadedMigrations::from_migrations(vec![
            Migration::new("20240101000000", "b", "SELECT 1", "SELECT 1"),
            Migration::new("20240101000000", "a", "SELECT 1", "SELECT 1"),
            Migration::new("20240102000000", "c", "SELECT 1", ""),
        ]);

        assert_eq!(loaded.duplicate_versions, vec!["20240101000000"]);
        assert_eq!(loaded.migrations.len(), 3);
        assert_eq!(loaded.migrations[0].name, "a");
        let valid: Vec<&str> = loaded.valid().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(valid, vec!["a", "b"]);
        assert!(
            loaded
                .issues
                .iter()
                .any(|i| i.kind == IssueKind::DuplicateVersion)
        );
    }

    #[test]
    fn test_load_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_migrations(&dir.path().join("nope")).unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.issues.is_empty());
    }

    #[test]
    fn test_load_path_that_is_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("migrations");
        fs::write(&file, "not a dir").unwrap();
        assert!(matches!(load_migrations(&file), Err(DriftError::Io { .. })));
    }

    #[test]
    fn test_create_migration_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("db").join("migrations");
        let path = create_migration(&target, "Create Users", "CREATE TABLE users (id int);", "DROP TABLE users;").unwrap();

        let loaded = load_migrations(&target).unwrap();
        assert_eq!(loaded.migrations.len(), 1);
        assert_eq!(loaded.migrations[0].name, "create_users");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(loaded.migrations[0].filename.as_str())
        );
        assert!(loaded.issues.is_empty());
    }
}
