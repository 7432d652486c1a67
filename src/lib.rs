//! # pgdrift: Migration Replay & Schema Drift
//!
//! Replays a directory of dbmate migrations into the schema they imply and
//! compares it against a snapshot of the live PostgreSQL database.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use pgdrift::prelude::*;
//!
//! let analysis = analyze_drift(
//!     Path::new("db/migrations"),
//!     Some(&LedgerFile::new("applied.json") as &dyn MigrationLedger),
//!     &SnapshotFile::new("schema.json"),
//! )?;
//! println!("{}", analysis.drift.summary);
//! ```
//!
//! ## Pipeline
//!
//! | Stage    | Module              | Output            |
//! |----------|---------------------|-------------------|
//! | Load     | `migrate::file`     | `LoadedMigrations`|
//! | Classify | `migrate::classify` | `ParsedOperation` |
//! | Replay   | `migrate::replay`   | `SchemaModel`     |
//! | Diff     | `diff`              | `DriftReport`     |

pub mod analysis;
pub mod config;
pub mod diff;
pub mod error;
pub mod migrate;
pub mod schema;

pub mod prelude {
    pub use crate::analysis::{
        DriftAnalysis, MigrationAnalysis, analyze_drift, analyze_migrations, expected_schema,
        issue_counts,
    };
    pub use crate::config::Config;
    pub use crate::diff::{DriftReport, diff_schemas};
    pub use crate::error::*;
    pub use crate::migrate::{
        AppliedMigration, LedgerFile, LoadedMigrations, Migration, MigrationHistory,
        MigrationLedger, create_migration, load_migrations, replay_migrations,
    };
    pub use crate::schema::{SchemaIntrospector, SchemaModel, SnapshotFile};
}

pub use analysis::{analyze_drift, analyze_migrations};
pub use diff::diff_schemas;
pub use migrate::{load_migrations, replay_migrations};
