//! Migration Module
//!
//! dbmate-style migration files, from directory listing to replayed schema.
//!
//! ## Pipeline
//! ```text
//! load_migrations ─▶ classify ─▶ Replay ─▶ SchemaModel (expected)
//!        │
//!        └─▶ migration_history (against the ledger)
//! ```
//!
//! ## Example
//! ```rust,ignore
//! use pgdrift::migrate::{load_migrations, replay_migrations};
//!
//! let loaded = load_migrations(Path::new("db/migrations"))?;
//! let expected = replay_migrations(loaded.valid());
//! ```

pub mod classify;
pub mod file;
pub mod history;
pub mod ident;
pub mod replay;

pub use classify::{
    Operation, OperationKind, ParsedOperation, classify, classify_statement, split_statements,
};
pub use file::{
    DOWN_MARKER, LoadedMigrations, Migration, MigrationContent, UP_MARKER, create_migration,
    format_migration_content, generate_filename, generate_timestamp, load_migrations,
    parse_filename, parse_migration_content, sanitize_name,
};
pub use history::{
    AppliedMigration, LedgerFile, MigrationHistory, MigrationLedger, migration_history,
};
pub use ident::ObjectName;
pub use replay::{Replay, ReplayOutcome, ReplayStats, replay_migrations, replay_with_stats};
