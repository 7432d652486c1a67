use pgdrift::error::IssueKind;
use pgdrift::migrate::{format_migration_content, load_migrations};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, filename: &str, up: &str, down: &str) {
    fs::write(dir.join(filename), format_migration_content(up, down)).unwrap();
}

#[test]
fn test_loads_in_version_order() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "20240101000000_a.sql", "CREATE TABLE a (id int);", "DROP TABLE a;");
    write(dir.path(), "20240103000000_b.sql", "CREATE TABLE b (id int);", "DROP TABLE b;");
    write(dir.path(), "20240102000000_c.sql", "CREATE TABLE c (id int);", "DROP TABLE c;");

    let loaded = load_migrations(dir.path()).expect("load failed");
    let names: Vec<&str> = loaded.migrations.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["a", "c", "b"]);
    assert!(loaded.issues.is_empty());
}

#[test]
fn test_duplicate_version_keeps_both_files() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "20240101000000_first.sql", "SELECT 1;", "SELECT 1;");
    write(dir.path(), "20240101000000_second.sql", "SELECT 2;", "SELECT 2;");

    let loaded = load_migrations(dir.path()).unwrap();
    assert_eq!(loaded.duplicate_versions, vec!["20240101000000"]);
    assert_eq!(loaded.migrations.len(), 2);
    let kinds: Vec<IssueKind> = loaded.issues.iter().map(|i| i.kind).collect();
    assert_eq!(kinds, vec![IssueKind::DuplicateVersion]);

    let json = serde_json::to_value(&loaded.issues[0]).unwrap();
    assert_eq!(json["kind"], "DUPLICATE_VERSION");
}

#[test]
fn test_empty_and_missing_directories() {
    let dir = TempDir::new().unwrap();
    assert!(load_migrations(dir.path()).unwrap().is_empty());
    assert!(load_migrations(&dir.path().join("missing")).unwrap().is_empty());
}

#[test]
fn test_invalid_files_are_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "20240101000000_ok.sql", "CREATE TABLE ok (id int);", "DROP TABLE ok;");
    fs::write(dir.path().join("20240102000000_no_down.sql"), "-- migrate:up\nCREATE TABLE x (id int);\n").unwrap();
    fs::write(dir.path().join("20240103000000_no_markers.sql"), "CREATE TABLE y (id int);\n").unwrap();
    fs::write(dir.path().join("README.md"), "not a migration").unwrap();

    let loaded = load_migrations(dir.path()).unwrap();
    assert_eq!(loaded.migrations.len(), 3);

    let mut kinds: Vec<(String, IssueKind)> = loaded
        .issues
        .iter()
        .map(|i| (i.filename.clone(), i.kind))
        .collect();
    kinds.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        kinds,
        vec![
            ("20240102000000_no_down.sql".to_string(), IssueKind::EmptyDown),
            ("20240103000000_no_markers.sql".to_string(), IssueKind::EmptyUp),
            ("20240103000000_no_markers.sql".to_string(), IssueKind::EmptyDown),
        ]
    );

    let valid: Vec<&str> = loaded.valid().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(valid, vec!["ok"]);
}

#[test]
fn test_non_utf8_file_does_not_stop_loading() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "20240101000000_ok.sql", "CREATE TABLE ok (id int);", "DROP TABLE ok;");
    // Latin-1 "café" in a comment.
    let mut latin1 = b"-- migrate:up\n-- caf".to_vec();
    latin1.push(0xE9);
    latin1.extend_from_slice(b"\nCREATE TABLE menu (id int);\n\n-- migrate:down\nDROP TABLE menu;\n");
    fs::write(dir.path().join("20240102000000_latin1.sql"), latin1).unwrap();

    let loaded = load_migrations(dir.path()).unwrap();
    let names: Vec<&str> = loaded.valid().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["ok", "latin1"]);
    assert!(loaded.migrations[1].up_sql.contains("CREATE TABLE menu"));
    assert!(loaded.issues.is_empty());
}
