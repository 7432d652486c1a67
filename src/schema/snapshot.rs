//! Live schema snapshots.
//!
//! Introspecting a running PostgreSQL database happens outside this crate.
//! Whatever does it hands over a [`SchemaModel`] through
//! [`SchemaIntrospector`]; the diff engine treats the result as read-only.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DriftError, DriftResult};
use crate::schema::model::SchemaModel;

/// Source of the "actual" side of a drift check.
pub trait SchemaIntrospector {
    fn introspect(&self) -> DriftResult<SchemaModel>;
}

/// A snapshot produced by an external introspector and saved as JSON.
///
/// The document has the five families as top-level arrays; missing
/// families are treated as empty:
///
/// ```json
/// {
///   "tables": [{"schema": "public", "name": "users", "columns": [], "constraints": []}],
///   "indexes": [],
///   "views": [],
///   "triggers": [],
///   "policies": []
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SchemaIntrospector for SnapshotFile {
    fn introspect(&self) -> DriftResult<SchemaModel> {
        let content = fs::read_to_string(&self.path).map_err(|e| DriftError::io(&self.path, e))?;
        let model: SchemaModel =
            serde_json::from_str(&content).map_err(|source| DriftError::Snapshot {
                path: self.path.clone(),
                source,
            })?;
        tracing::info!(
            "Loaded snapshot {}: {} tables, {} indexes, {} views, {} triggers, {} policies",
            self.path.display(),
            model.tables.len(),
            model.indexes.len(),
            model.views.len(),
            model.triggers.len(),
            model.policies.len()
        );
        Ok(model)
    }
}

/// An in-memory model is its own snapshot.
impl SchemaIntrospector for SchemaModel {
    fn introspect(&self) -> DriftResult<SchemaModel> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_file_roundtrips_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let mut model = SchemaModel::new();
        model.add_table(crate::schema::Table::new("public", "users"));
        fs::write(&path, serde_json::to_string(&model).unwrap()).unwrap();

        let loaded = SnapshotFile::new(&path).introspect().unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn test_snapshot_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        fs::write(&path, "{ not json").unwrap();

        let err = SnapshotFile::new(&path).introspect().unwrap_err();
        assert!(matches!(err, DriftError::Snapshot { .. }));
    }

    #[test]
    fn test_missing_snapshot_is_io_error() {
        let err = SnapshotFile::new("/nonexistent/schema.json").introspect().unwrap_err();
        assert!(matches!(err, DriftError::Io { .. }));
    }
}
