//! Schema Replay
//!
//! Folds classified operations into a [`SchemaModel`], one migration at a
//! time, in the order given. Later operations see the state left by earlier
//! ones, so the caller must hand migrations over in ascending version order.
//!
//! Replay is existence-level. `CREATE TABLE` yields an empty table and
//! `ADD COLUMN` yields a nullable `text` column tagged as a placeholder;
//! column types are never recovered from DDL text.

use serde::Serialize;

use super::classify::{Operation, ParsedOperation, classify};
use super::file::Migration;
use super::ident::ObjectName;
use crate::schema::{
    Column, Constraint, Index, Policy, SchemaModel, Table, Trigger, View, policy_key, table_key,
    trigger_key, view_key,
};

/// What happened to one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The model changed.
    Applied,
    /// A DDL operation whose target was absent (or already present).
    Skipped,
    /// Not DDL replay understands.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStats {
    pub migrations: usize,
    pub applied: usize,
    pub skipped: usize,
    pub ignored: usize,
}

impl ReplayStats {
    fn record(&mut self, outcome: ReplayOutcome) {
        match outcome {
            ReplayOutcome::Applied => self.applied += 1,
            ReplayOutcome::Skipped => self.skipped += 1,
            ReplayOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// A replay in progress. Owns the model it is building.
#[derive(Debug, Default)]
pub struct Replay {
    model: SchemaModel,
    stats: ReplayStats,
}

impl Replay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> &SchemaModel {
        &self.model
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    pub fn finish(self) -> (SchemaModel, ReplayStats) {
        (self.model, self.stats)
    }

    /// Classify a migration's up SQL and apply every operation in it.
    pub fn apply_migration(&mut self, migration: &Migration) {
        tracing::debug!("Replaying {}", migration.filename);
        for op in classify(&migration.up_sql) {
            self.apply(&op);
        }
        self.stats.migrations += 1;
    }

    /// Apply one operation to the model.
    pub fn apply(&mut self, op: &ParsedOperation) -> ReplayOutcome {
        let outcome = self.mutate(op);
        match outcome {
            ReplayOutcome::Applied => tracing::debug!("  {}", op.kind()),
            ReplayOutcome::Skipped => tracing::debug!("  {} (no-op)", op.kind()),
            ReplayOutcome::Ignored => {}
        }
        self.stats.record(outcome);
        outcome
    }

    fn mutate(&mut self, op: &ParsedOperation) -> ReplayOutcome {
        let model = &mut self.model;
        let statement = op.statement.as_str();

        match &op.operation {
            Operation::CreateTable { table } => {
                let key = table_key(table.schema(), &table.name);
                if model.tables.contains_key(&key) {
                    return ReplayOutcome::Skipped;
                }
                model.add_table(Table::new(table.schema(), &table.name));
                ReplayOutcome::Applied
            }
            Operation::DropTable { tables } => {
                let mut outcome = ReplayOutcome::Skipped;
                for table in tables {
                    let key = table_key(table.schema(), &table.name);
                    if model.tables.remove(&key).is_some() {
                        model.remove_table_dependents(table.schema(), &table.name);
                        outcome = ReplayOutcome::Applied;
                    }
                }
                outcome
            }
            Operation::AddColumn { table, column } => {
                let Some(target) = table_mut(model, table) else {
                    return ReplayOutcome::Skipped;
                };
                if target.find_column(column).is_some() {
                    return ReplayOutcome::Skipped;
                }
                target.columns.push(Column::placeholder(column));
                ReplayOutcome::Applied
            }
            Operation::DropColumn { table, column } => {
                let Some(target) = table_mut(model, table) else {
                    return ReplayOutcome::Skipped;
                };
                let before = target.columns.len();
                target.columns.retain(|c| &c.name != column);
                changed(target.columns.len() != before)
            }
            Operation::AddConstraint {
                table,
                constraint,
                kind,
            } => {
                let Some(target) = table_mut(model, table) else {
                    return ReplayOutcome::Skipped;
                };
                target.constraints.retain(|c| &c.name != constraint);
                target.constraints.push(Constraint {
                    name: constraint.clone(),
                    kind: *kind,
                    definition: Some(statement.to_string()),
                });
                ReplayOutcome::Applied
            }
            Operation::DropConstraint { table, constraint } => {
                let Some(target) = table_mut(model, table) else {
                    return ReplayOutcome::Skipped;
                };
                let before = target.constraints.len();
                target.constraints.retain(|c| &c.name != constraint);
                changed(target.constraints.len() != before)
            }
            Operation::RenameTable { table, to } => {
                let key = table_key(table.schema(), &table.name);
                if model.tables.contains_key(&table_key(table.schema(), to)) {
                    tracing::debug!("  rename of {} onto existing table {}", key, to);
                    return ReplayOutcome::Skipped;
                }
                let Some(mut renamed) = model.tables.remove(&key) else {
                    return ReplayOutcome::Skipped;
                };
                renamed.name = to.clone();
                model.add_table(renamed);
                model.rename_table_dependents(table.schema(), &table.name, to);
                ReplayOutcome::Applied
            }
            Operation::RenameColumn { table, from, to } => {
                let Some(target) = table_mut(model, table) else {
                    return ReplayOutcome::Skipped;
                };
                match target.find_column_mut(from) {
                    Some(column) => {
                        column.name = to.clone();
                        ReplayOutcome::Applied
                    }
                    None => ReplayOutcome::Skipped,
                }
            }
            Operation::CreateIndex {
                name,
                table,
                unique,
                concurrent,
            } => {
                model.add_index(Index {
                    schema: table.schema().to_string(),
                    table: table.name.clone(),
                    name: name.clone(),
                    unique: *unique,
                    concurrent: *concurrent,
                    definition: Some(statement.to_string()),
                });
                ReplayOutcome::Applied
            }
            Operation::DropIndex { indexes } => {
                let mut outcome = ReplayOutcome::Skipped;
                for index in indexes {
                    if let Some(key) = model.find_index_key(index.schema(), &index.name) {
                        model.indexes.remove(&key);
                        outcome = ReplayOutcome::Applied;
                    }
                }
                outcome
            }
            Operation::CreateView { view, materialized } => {
                model.views.remove(&view_key(view.schema(), &view.name));
                model.add_view(View {
                    materialized: *materialized,
                    ..View::new(view.schema(), &view.name, statement)
                });
                ReplayOutcome::Applied
            }
            Operation::DropView { views } => {
                let mut outcome = ReplayOutcome::Skipped;
                for view in views {
                    if model.views.remove(&view_key(view.schema(), &view.name)).is_some() {
                        outcome = ReplayOutcome::Applied;
                    }
                }
                outcome
            }
            Operation::CreateTrigger { name, table } => {
                model.add_trigger(Trigger {
                    definition: Some(statement.to_string()),
                    ..Trigger::new(table.schema(), &table.name, name)
                });
                ReplayOutcome::Applied
            }
            Operation::DropTrigger { name, table } => {
                let key = trigger_key(table.schema(), &table.name, name);
                changed(model.triggers.remove(&key).is_some())
            }
            Operation::CreatePolicy { name, table } => {
                model.add_policy(Policy {
                    definition: Some(statement.to_string()),
                    ..Policy::new(table.schema(), &table.name, name)
                });
                ReplayOutcome::Applied
            }
            Operation::DropPolicy { name, table } => {
                let key = policy_key(table.schema(), &table.name, name);
                changed(model.policies.remove(&key).is_some())
            }
            Operation::Other => ReplayOutcome::Ignored,
        }
    }
}

fn table_mut<'a>(model: &'a mut SchemaModel, table: &ObjectName) -> Option<&'a mut Table> {
    model.tables.get_mut(&table_key(table.schema(), &table.name))
}

fn changed(applied: bool) -> ReplayOutcome {
    if applied {
        ReplayOutcome::Applied
    } else {
        ReplayOutcome::Skipped
    }
}

/// Replay migrations, in the order given, into a fresh model.
pub fn replay_migrations<'a>(migrations: impl IntoIterator<Item = &'a Migration>) -> SchemaModel {
    replay_with_stats(migrations).0
}

/// Like [`replay_migrations`], also returning operation counts.
pub fn replay_with_stats<'a>(
    migrations: impl IntoIterator<Item = &'a Migration>,
) -> (SchemaModel, ReplayStats) {
    let mut replay = Replay::new();
    for migration in migrations {
        replay.apply_migration(migration);
    }
    let stats = replay.stats();
    tracing::info!(
        "Replayed {} migration(s): {} applied, {} no-op, {} ignored",
        stats.migrations,
        stats.applied,
        stats.skipped,
        stats.ignored
    );
    replay.finish()
}
