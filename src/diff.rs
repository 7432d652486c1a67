//! Schema Diff
//!
//! Compares the schema implied by migrations (`expected`) against a live
//! snapshot (`actual`) by composite key. Never fails: any two models produce
//! a well-formed [`DriftReport`].
//!
//! The comparison is shallow. Columns synthesized by replay carry placeholder
//! attributes, so a precise live schema will show them as modified. Those
//! entries are flagged with `placeholder: true` rather than hidden.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::DriftResult;
use crate::schema::{Column, Entity, EntityMap, SchemaModel, Table, View};

const NO_DRIFT: &str = "No schema drift detected. Database schema matches migrations.";

/// Column attributes the diff compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnProperty {
    DataType,
    IsNullable,
    DefaultValue,
    CharacterMaximumLength,
    NumericPrecision,
    NumericScale,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDiff {
    pub property: ColumnProperty,
    pub expected: Value,
    pub actual: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDrift {
    pub name: String,
    /// The expected side was synthesized by replay.
    pub placeholder: bool,
    pub differences: Vec<PropertyDiff>,
}

/// Structural changes to a table present on both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDrift {
    pub key: String,
    pub missing_columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub modified_columns: Vec<ColumnDrift>,
    pub missing_constraints: Vec<String>,
    pub extra_constraints: Vec<String>,
}

impl TableDrift {
    pub fn is_empty(&self) -> bool {
        self.missing_columns.is_empty()
            && self.extra_columns.is_empty()
            && self.modified_columns.is_empty()
            && self.missing_constraints.is_empty()
            && self.extra_constraints.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDrift {
    pub key: String,
    pub definition_changed: bool,
    pub expected_definition: String,
    pub actual_definition: String,
}

/// Result of [`diff_schemas`]. Every key list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub missing_tables: Vec<String>,
    pub extra_tables: Vec<String>,
    pub modified_tables: Vec<TableDrift>,
    pub missing_indexes: Vec<String>,
    pub extra_indexes: Vec<String>,
    pub missing_views: Vec<String>,
    pub extra_views: Vec<String>,
    pub modified_views: Vec<ViewDrift>,
    pub missing_triggers: Vec<String>,
    pub extra_triggers: Vec<String>,
    pub missing_policies: Vec<String>,
    pub extra_policies: Vec<String>,
    /// Modified columns whose expected side is a replay placeholder.
    pub placeholder_column_changes: usize,
    pub has_changes: bool,
    pub summary: String,
}

/// Compare `expected` against `actual`.
pub fn diff_schemas(expected: &SchemaModel, actual: &SchemaModel) -> DriftReport {
    let (missing_tables, extra_tables) = key_difference(&expected.tables, &actual.tables);
    let (missing_indexes, extra_indexes) = key_difference(&expected.indexes, &actual.indexes);
    let (missing_views, extra_views) = key_difference(&expected.views, &actual.views);
    let (missing_triggers, extra_triggers) = key_difference(&expected.triggers, &actual.triggers);
    let (missing_policies, extra_policies) =
        key_difference(&expected.policies, &actual.policies);

    let modified_tables: Vec<TableDrift> = expected
        .tables
        .sorted_keys()
        .into_iter()
        .filter_map(|key| {
            let drift = diff_table(expected.tables.get(&key)?, actual.tables.get(&key)?);
            (!drift.is_empty()).then_some(drift)
        })
        .collect();

    let modified_views: Vec<ViewDrift> = expected
        .views
        .sorted_keys()
        .into_iter()
        .filter_map(|key| diff_view(expected.views.get(&key)?, actual.views.get(&key)?))
        .collect();

    let placeholder_column_changes = modified_tables
        .iter()
        .flat_map(|t| &t.modified_columns)
        .filter(|c| c.placeholder)
        .count();

    let mut report = DriftReport {
        missing_tables,
        extra_tables,
        modified_tables,
        missing_indexes,
        extra_indexes,
        missing_views,
        extra_views,
        modified_views,
        missing_triggers,
        extra_triggers,
        missing_policies,
        extra_policies,
        placeholder_column_changes,
        has_changes: false,
        summary: String::new(),
    };
    let parts = report.summary_parts();
    report.has_changes = !parts.is_empty();
    report.summary = if parts.is_empty() {
        NO_DRIFT.to_string()
    } else {
        format!("Schema drift detected: {}.", parts.join(", "))
    };

    tracing::info!("{}", report.summary);
    report
}

impl DriftReport {
    pub fn to_json(&self) -> DriftResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn summary_parts(&self) -> Vec<String> {
        let counts = [
            (self.missing_tables.len(), "table(s) missing from database"),
            (self.extra_tables.len(), "extra table(s) in database"),
            (self.modified_tables.len(), "table(s) have structural changes"),
            (self.missing_indexes.len(), "index(es) missing from database"),
            (self.extra_indexes.len(), "extra index(es) in database"),
            (self.missing_views.len(), "view(s) missing from database"),
            (self.extra_views.len(), "extra view(s) in database"),
            (self.modified_views.len(), "view(s) have definition changes"),
            (self.missing_triggers.len(), "trigger(s) missing from database"),
            (self.extra_triggers.len(), "extra trigger(s) in database"),
            (self.missing_policies.len(), "policy(ies) missing from database"),
            (self.extra_policies.len(), "extra policy(ies) in database"),
        ];
        counts
            .into_iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, what)| format!("{} {}", n, what))
            .collect()
    }
}

/// Keys only in `expected` and keys only in `actual`, each sorted.
fn key_difference<T: Entity>(
    expected: &EntityMap<T>,
    actual: &EntityMap<T>,
) -> (Vec<String>, Vec<String>) {
    let missing = expected
        .sorted_keys()
        .into_iter()
        .filter(|k| !actual.contains_key(k))
        .collect();
    let extra = actual
        .sorted_keys()
        .into_iter()
        .filter(|k| !expected.contains_key(k))
        .collect();
    (missing, extra)
}

fn diff_table(expected: &Table, actual: &Table) -> TableDrift {
    let mut drift = TableDrift {
        key: expected.key(),
        ..Default::default()
    };

    for col in &expected.columns {
        match actual.find_column(&col.name) {
            None => drift.missing_columns.push(col.name.clone()),
            Some(live) => {
                let differences = diff_column(col, live);
                if !differences.is_empty() {
                    drift.modified_columns.push(ColumnDrift {
                        name: col.name.clone(),
                        placeholder: col.is_placeholder(),
                        differences,
                    });
                }
            }
        }
    }
    drift.extra_columns = actual
        .columns
        .iter()
        .filter(|c| expected.find_column(&c.name).is_none())
        .map(|c| c.name.clone())
        .collect();

    let expected_names: HashSet<&str> = expected.constraints.iter().map(|c| c.name.as_str()).collect();
    let actual_names: HashSet<&str> = actual.constraints.iter().map(|c| c.name.as_str()).collect();
    drift.missing_constraints = sorted_difference(&expected_names, &actual_names);
    drift.extra_constraints = sorted_difference(&actual_names, &expected_names);

    drift
}

fn sorted_difference(a: &HashSet<&str>, b: &HashSet<&str>) -> Vec<String> {
    let mut names: Vec<String> = a.difference(b).map(|s| s.to_string()).collect();
    names.sort();
    names
}

fn diff_column(expected: &Column, actual: &Column) -> Vec<PropertyDiff> {
    let pairs = [
        (
            ColumnProperty::DataType,
            json!(expected.data_type),
            json!(actual.data_type),
        ),
        (
            ColumnProperty::IsNullable,
            json!(expected.is_nullable),
            json!(actual.is_nullable),
        ),
        (
            ColumnProperty::DefaultValue,
            json!(expected.default_value),
            json!(actual.default_value),
        ),
        (
            ColumnProperty::CharacterMaximumLength,
            json!(expected.character_maximum_length),
            json!(actual.character_maximum_length),
        ),
        (
            ColumnProperty::NumericPrecision,
            json!(expected.numeric_precision),
            json!(actual.numeric_precision),
        ),
        (
            ColumnProperty::NumericScale,
            json!(expected.numeric_scale),
            json!(actual.numeric_scale),
        ),
    ];

    pairs
        .into_iter()
        .filter(|(_, e, a)| e != a)
        .map(|(property, expected, actual)| PropertyDiff {
            property,
            expected,
            actual,
        })
        .collect()
}

fn diff_view(expected: &View, actual: &View) -> Option<ViewDrift> {
    let changed = expected.definition.trim() != actual.definition.trim();
    changed.then(|| ViewDrift {
        key: expected.key(),
        definition_changed: true,
        expected_definition: expected.definition.clone(),
        actual_definition: actual.definition.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Constraint, ConstraintKind, Index, Policy, Trigger};
    use pretty_assertions::assert_eq;

    fn sample() -> SchemaModel {
        let mut model = SchemaModel::new();
        model.add_table(
            Table::new("public", "orders")
                .column(Column::new("id", "bigint").not_null())
                .constraint(Constraint::new("orders_pkey", ConstraintKind::PrimaryKey)),
        );
        model.add_index(Index::new("public", "orders", "orders_id_idx"));
        model.add_view(View::new("public", "recent", "SELECT 1"));
        model.add_trigger(Trigger::new("public", "orders", "orders_touch"));
        model.add_policy(Policy::new("public", "orders", "orders_owner"));
        model
    }

    #[test]
    fn test_identical_models_have_no_drift() {
        let model = sample();
        let report = diff_schemas(&model, &model.clone());
        assert!(!report.has_changes);
        assert_eq!(
            report.summary,
            "No schema drift detected. Database schema matches migrations."
        );
    }

    #[test]
    fn test_missing_table() {
        let expected = sample();
        let mut actual = sample();
        actual.tables.remove("public.orders");

        let report = diff_schemas(&expected, &actual);
        assert_eq!(report.missing_tables, vec!["public.orders"]);
        assert!(report.extra_tables.is_empty());
        assert!(report.has_changes);
        assert_eq!(
            report.summary,
            "Schema drift detected: 1 table(s) missing from database."
        );
    }

    #[test]
    fn test_empty_expected_reports_everything_extra() {
        let report = diff_schemas(&SchemaModel::new(), &sample());
        assert_eq!(report.extra_tables, vec!["public.orders"]);
        assert_eq!(report.extra_indexes, vec!["public.orders.orders_id_idx"]);
        assert_eq!(report.extra_views, vec!["public.recent"]);
        assert_eq!(report.extra_triggers, vec!["public.orders.orders_touch"]);
        assert_eq!(report.extra_policies, vec!["public.orders.orders_owner"]);
        assert!(report.modified_tables.is_empty());

        let reverse = diff_schemas(&sample(), &SchemaModel::new());
        assert_eq!(reverse.missing_policies, vec!["public.orders.orders_owner"]);
        assert!(reverse.extra_tables.is_empty());
    }

    #[test]
    fn test_column_and_constraint_drift() {
        let mut expected = SchemaModel::new();
        expected.add_table(
            Table::new("public", "users")
                .column(Column::placeholder("email"))
                .column(Column::new("gone", "text"))
                .constraint(Constraint::new("users_pkey", ConstraintKind::PrimaryKey)),
        );
        let mut actual = SchemaModel::new();
        actual.add_table(
            Table::new("public", "users")
                .column(Column::new("email", "character varying").not_null().max_length(255))
                .column(Column::new("added", "integer"))
                .constraint(Constraint::new("users_email_key", ConstraintKind::Unique)),
        );

        let report = diff_schemas(&expected, &actual);
        assert_eq!(report.modified_tables.len(), 1);
        let table = &report.modified_tables[0];
        assert_eq!(table.key, "public.users");
        assert_eq!(table.missing_columns, vec!["gone"]);
        assert_eq!(table.extra_columns, vec!["added"]);
        assert_eq!(table.missing_constraints, vec!["users_pkey"]);
        assert_eq!(table.extra_constraints, vec!["users_email_key"]);

        let email = &table.modified_columns[0];
        assert!(email.placeholder);
        let props: Vec<ColumnProperty> = email.differences.iter().map(|d| d.property).collect();
        assert_eq!(
            props,
            vec![
                ColumnProperty::DataType,
                ColumnProperty::IsNullable,
                ColumnProperty::CharacterMaximumLength
            ]
        );
        assert_eq!(email.differences[2].expected, Value::Null);
        assert_eq!(email.differences[2].actual, json!(255));
        assert_eq!(report.placeholder_column_changes, 1);
        assert_eq!(
            report.summary,
            "Schema drift detected: 1 table(s) have structural changes."
        );
    }

    #[test]
    fn test_view_definition_compared_trimmed() {
        let mut expected = SchemaModel::new();
        expected.add_view(View::new("public", "a", "  SELECT 1\n"));
        expected.add_view(View::new("public", "b", "SELECT 1"));
        let mut actual = SchemaModel::new();
        actual.add_view(View::new("public", "a", "SELECT 1"));
        actual.add_view(View::new("public", "b", "SELECT 2"));

        let report = diff_schemas(&expected, &actual);
        assert_eq!(report.modified_views.len(), 1);
        assert_eq!(report.modified_views[0].key, "public.b");
        assert!(report.modified_views[0].definition_changed);
    }

    #[test]
    fn test_report_json_shape() {
        let mut actual = sample();
        actual.tables.remove("public.orders");
        let json = diff_schemas(&sample(), &actual).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["missingTables"], json!(["public.orders"]));
        assert_eq!(value["hasChanges"], json!(true));
        assert!(value.get("placeholderColumnChanges").is_some());
    }
}
