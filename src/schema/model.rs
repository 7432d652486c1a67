//! Schema Model
//!
//! The in-memory shape both sides of a drift check are expressed in: the
//! schema implied by replaying migrations, and the snapshot taken from a live
//! database. Five entity families, each keyed by a composite string key:
//!
//! | Family   | Key                      |
//! |----------|--------------------------|
//! | tables   | `schema.table`           |
//! | indexes  | `schema.table.index`     |
//! | views    | `schema.view`            |
//! | triggers | `schema.table.trigger`   |
//! | policies | `schema.table.policy`    |

use std::collections::HashMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Schema assumed for unqualified object names.
pub const DEFAULT_SCHEMA: &str = "public";

/// Data type given to columns whose real type replay cannot recover.
pub const PLACEHOLDER_TYPE: &str = "text";

pub fn table_key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

pub fn view_key(schema: &str, view: &str) -> String {
    format!("{}.{}", schema, view)
}

pub fn index_key(schema: &str, table: &str, index: &str) -> String {
    format!("{}.{}.{}", schema, table, index)
}

pub fn trigger_key(schema: &str, table: &str, trigger: &str) -> String {
    format!("{}.{}.{}", schema, table, trigger)
}

pub fn policy_key(schema: &str, table: &str, policy: &str) -> String {
    format!("{}.{}.{}", schema, table, policy)
}

/// Anything stored in an [`EntityMap`] knows its own composite key.
pub trait Entity {
    fn key(&self) -> String;
}

/// Key-indexed arena.
///
/// Entities live in insertion order in `slots`; `index` maps each composite
/// key to its slot. A key owns at most one live slot at any time.
#[derive(Debug, Clone)]
pub struct EntityMap<T> {
    slots: Vec<Option<T>>,
    index: HashMap<String, usize>,
}

impl<T> Default for EntityMap<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Entity> EntityMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        match self.index.get(key) {
            Some(&slot) => self.slots[slot].as_mut(),
            None => None,
        }
    }

    /// Insert an entity under its own key, returning the one it displaced.
    ///
    /// A displaced entity keeps its slot, so replacing does not reorder.
    pub fn insert(&mut self, entity: T) -> Option<T> {
        let key = entity.key();
        match self.index.get(&key) {
            Some(&slot) => self.slots[slot].replace(entity),
            None => {
                self.index.insert(key, self.slots.len());
                self.slots.push(Some(entity));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let slot = self.index.remove(key)?;
        let removed = self.slots[slot].take();
        if self.slots.len() > 32 && self.index.len() * 2 < self.slots.len() {
            self.compact();
        }
        removed
    }

    /// Remove every entity the predicate rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let doomed: Vec<String> = self
            .values()
            .filter(|entity| !keep(*entity))
            .map(Entity::key)
            .collect();
        for key in doomed {
            self.remove(&key);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.values().map(Entity::key)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten()
    }

    /// Keys in lexical order, for stable reports.
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.index.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn compact(&mut self) {
        let live: Vec<T> = self.slots.drain(..).flatten().collect();
        self.index.clear();
        for entity in live {
            self.index.insert(entity.key(), self.slots.len());
            self.slots.push(Some(entity));
        }
    }
}

impl<T: Entity> FromIterator<T> for EntityMap<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut map = Self::new();
        for entity in iter {
            map.insert(entity);
        }
        map
    }
}

/// Equality is by key and content; slot order does not matter.
impl<T: Entity + PartialEq> PartialEq for EntityMap<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .values()
                .all(|entity| other.get(&entity.key()) == Some(entity))
    }
}

impl<T: Entity + Serialize> Serialize for EntityMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.values())
    }
}

impl<'de, T: Entity + Deserialize<'de>> Deserialize<'de> for EntityMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entities = Vec::<T>::deserialize(deserializer)?;
        Ok(entities.into_iter().collect())
    }
}

/// Where a column's attributes came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnOrigin {
    /// Read from a live database; attributes are authoritative.
    #[default]
    Introspected,
    /// Synthesized by replay; only the name is known.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_true")]
    pub is_nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub character_maximum_length: Option<i32>,
    #[serde(default)]
    pub numeric_precision: Option<i32>,
    #[serde(default)]
    pub numeric_scale: Option<i32>,
    #[serde(default)]
    pub origin: ColumnOrigin,
}

fn default_true() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default_value: None,
            character_maximum_length: None,
            numeric_precision: None,
            numeric_scale: None,
            origin: ColumnOrigin::Introspected,
        }
    }

    /// A column added by replay: nullable `text`, tagged as a placeholder.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            origin: ColumnOrigin::Placeholder,
            ..Self::new(name, PLACEHOLDER_TYPE)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn default(mut self, val: impl Into<String>) -> Self {
        self.default_value = Some(val.into());
        self
    }

    pub fn max_length(mut self, len: i32) -> Self {
        self.character_maximum_length = Some(len);
        self
    }

    pub fn numeric(mut self, precision: i32, scale: i32) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.origin == ColumnOrigin::Placeholder
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
    Exclusion,
    #[default]
    Other,
}

impl ConstraintKind {
    /// Guess the kind from the text following `ADD CONSTRAINT name`.
    pub fn from_clause(clause: &str) -> Self {
        let upper = clause.trim_start().to_ascii_uppercase();
        if upper.starts_with("PRIMARY KEY") {
            Self::PrimaryKey
        } else if upper.starts_with("FOREIGN KEY") {
            Self::ForeignKey
        } else if upper.starts_with("UNIQUE") {
            Self::Unique
        } else if upper.starts_with("CHECK") {
            Self::Check
        } else if upper.starts_with("EXCLUDE") {
            Self::Exclusion
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub name: String,
    #[serde(default)]
    pub kind: ConstraintKind,
    #[serde(default)]
    pub definition: Option<String>,
}

impl Constraint {
    pub fn new(name: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            name: name.into(),
            kind,
            definition: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn column(mut self, col: Column) -> Self {
        self.columns.push(col);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn find_column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn find_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }
}

impl Entity for Table {
    fn key(&self) -> String {
        table_key(&self.schema, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema: String,
    pub table: String,
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub definition: Option<String>,
}

impl Index {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            name: name.into(),
            unique: false,
            concurrent: false,
            definition: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

impl Entity for Index {
    fn key(&self) -> String {
        index_key(&self.schema, &self.table, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub schema: String,
    pub name: String,
    pub definition: String,
    #[serde(default)]
    pub materialized: bool,
}

impl View {
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            definition: definition.into(),
            materialized: false,
        }
    }
}

impl Entity for View {
    fn key(&self) -> String {
        view_key(&self.schema, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub schema: String,
    pub table: String,
    pub name: String,
    #[serde(default)]
    pub definition: Option<String>,
}

impl Trigger {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            name: name.into(),
            definition: None,
        }
    }
}

impl Entity for Trigger {
    fn key(&self) -> String {
        trigger_key(&self.schema, &self.table, &self.name)
    }
}

/// A row level security policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub schema: String,
    pub table: String,
    pub name: String,
    #[serde(default)]
    pub definition: Option<String>,
}

impl Policy {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            name: name.into(),
            definition: None,
        }
    }
}

impl Entity for Policy {
    fn key(&self) -> String {
        policy_key(&self.schema, &self.table, &self.name)
    }
}

/// A complete database schema across the five entity families.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaModel {
    pub tables: EntityMap<Table>,
    pub indexes: EntityMap<Index>,
    pub views: EntityMap<View>,
    pub triggers: EntityMap<Trigger>,
    pub policies: EntityMap<Policy>,
}

impl SchemaModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table);
    }

    pub fn add_index(&mut self, index: Index) {
        self.indexes.insert(index);
    }

    pub fn add_view(&mut self, view: View) {
        self.views.insert(view);
    }

    pub fn add_trigger(&mut self, trigger: Trigger) {
        self.triggers.insert(trigger);
    }

    pub fn add_policy(&mut self, policy: Policy) {
        self.policies.insert(policy);
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.indexes.is_empty()
            && self.views.is_empty()
            && self.triggers.is_empty()
            && self.policies.is_empty()
    }

    /// Find an index by schema and name alone.
    ///
    /// `DROP INDEX` does not name the table, but index names are unique
    /// within a schema.
    pub fn find_index_key(&self, schema: &str, name: &str) -> Option<String> {
        self.indexes
            .values()
            .find(|idx| idx.schema == schema && idx.name == name)
            .map(Entity::key)
    }

    /// Drop the indexes, triggers and policies that hang off a table.
    pub fn remove_table_dependents(&mut self, schema: &str, table: &str) {
        self.indexes.retain(|i| !i.owned_by(schema, table));
        self.triggers.retain(|t| !t.owned_by(schema, table));
        self.policies.retain(|p| !p.owned_by(schema, table));
    }

    /// Re-home the dependents of a renamed table.
    pub fn rename_table_dependents(&mut self, schema: &str, from: &str, to: &str) {
        rehome(&mut self.indexes, schema, from, to);
        rehome(&mut self.triggers, schema, from, to);
        rehome(&mut self.policies, schema, from, to);
    }
}

/// Entities keyed under a parent table.
trait TableOwned {
    fn owner(&self) -> (&str, &str);
    fn set_table(&mut self, table: &str);

    fn owned_by(&self, schema: &str, table: &str) -> bool {
        self.owner() == (schema, table)
    }
}

macro_rules! impl_table_owned {
    ($($ty:ty),*) => {
        $(impl TableOwned for $ty {
            fn owner(&self) -> (&str, &str) {
                (&self.schema, &self.table)
            }

            fn set_table(&mut self, table: &str) {
                self.table = table.to_string();
            }
        })*
    };
}

impl_table_owned!(Index, Trigger, Policy);

fn rehome<T: Entity + TableOwned>(map: &mut EntityMap<T>, schema: &str, from: &str, to: &str) {
    let keys: Vec<String> = map
        .values()
        .filter(|e| e.owned_by(schema, from))
        .map(Entity::key)
        .collect();
    for key in keys {
        let Some(mut entity) = map.remove(&key) else {
            continue;
        };
        entity.set_table(to);
        if map.contains_key(&entity.key()) {
            tracing::debug!("{} stays put: {} is taken", key, entity.key());
            entity.set_table(from);
        }
        map.insert(entity);
    }
}

impl fmt::Display for SchemaModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.tables.sorted_keys() {
            let Some(table) = self.tables.get(&key) else {
                continue;
            };
            writeln!(f, "table {} {{", key)?;
            for col in &table.columns {
                let mut attrs = Vec::new();
                if !col.is_nullable {
                    attrs.push("not_null".to_string());
                }
                if let Some(def) = &col.default_value {
                    attrs.push(format!("default {}", def));
                }
                if col.is_placeholder() {
                    attrs.push("(placeholder)".to_string());
                }
                let attrs = if attrs.is_empty() {
                    String::new()
                } else {
                    format!(" {}", attrs.join(" "))
                };
                writeln!(f, "  {} {}{}", col.name, col.data_type, attrs)?;
            }
            for constraint in &table.constraints {
                writeln!(f, "  constraint {}", constraint.name)?;
            }
            writeln!(f, "}}")?;
        }
        for key in self.indexes.sorted_keys() {
            writeln!(f, "index {}", key)?;
        }
        for key in self.views.sorted_keys() {
            writeln!(f, "view {}", key)?;
        }
        for key in self.triggers.sorted_keys() {
            writeln!(f, "trigger {}", key)?;
        }
        for key in self.policies.sorted_keys() {
            writeln!(f, "policy {}", key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_map_insert_replaces_in_place() {
        let mut map = EntityMap::new();
        map.insert(View::new("public", "a", "select 1"));
        map.insert(View::new("public", "b", "select 2"));
        let old = map.insert(View::new("public", "a", "select 3"));

        assert_eq!(old.map(|v| v.definition), Some("select 1".to_string()));
        assert_eq!(map.len(), 2);
        let names: Vec<_> = map.values().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_entity_map_remove_and_compact() {
        let mut map: EntityMap<Table> = (0..40)
            .map(|i| Table::new("public", format!("t{}", i)))
            .collect();
        for i in 0..30 {
            assert!(map.remove(&format!("public.t{}", i)).is_some());
        }
        assert_eq!(map.len(), 10);
        assert!(map.get("public.t35").is_some());
        assert!(map.remove("public.t0").is_none());
    }

    #[test]
    fn test_entity_map_equality_ignores_order() {
        let a: EntityMap<Table> = vec![Table::new("public", "a"), Table::new("public", "b")]
            .into_iter()
            .collect();
        let b: EntityMap<Table> = vec![Table::new("public", "b"), Table::new("public", "a")]
            .into_iter()
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_remove_table_dependents() {
        let mut model = SchemaModel::new();
        model.add_table(Table::new("public", "users"));
        model.add_index(Index::new("public", "users", "users_email_idx"));
        model.add_index(Index::new("public", "orders", "orders_user_idx"));
        model.add_trigger(Trigger::new("public", "users", "touch"));
        model.add_policy(Policy::new("public", "users", "owner_only"));

        model.remove_table_dependents("public", "users");

        assert_eq!(model.indexes.sorted_keys(), vec!["public.orders.orders_user_idx"]);
        assert!(model.triggers.is_empty());
        assert!(model.policies.is_empty());
    }

    #[test]
    fn test_rename_table_dependents() {
        let mut model = SchemaModel::new();
        model.add_index(Index::new("public", "users", "users_email_idx"));
        model.add_policy(Policy::new("public", "users", "owner_only"));

        model.rename_table_dependents("public", "users", "accounts");

        assert!(model.indexes.contains_key("public.accounts.users_email_idx"));
        assert!(model.policies.contains_key("public.accounts.owner_only"));
    }

    #[test]
    fn test_rename_dependents_keeps_occupied_keys() {
        let mut model = SchemaModel::new();
        model.add_trigger(Trigger::new("public", "users", "touch"));
        model.add_trigger(Trigger {
            definition: Some("existing".into()),
            ..Trigger::new("public", "accounts", "touch")
        });

        model.rename_table_dependents("public", "users", "accounts");

        assert_eq!(
            model.triggers.sorted_keys(),
            vec!["public.accounts.touch", "public.users.touch"]
        );
        assert_eq!(
            model
                .triggers
                .get("public.accounts.touch")
                .and_then(|t| t.definition.as_deref()),
            Some("existing")
        );
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = r#"{
            "tables": [{
                "schema": "public",
                "name": "users",
                "columns": [{"name": "id", "dataType": "integer", "isNullable": false}]
            }],
            "views": [{"schema": "public", "name": "active_users", "definition": "SELECT 1"}]
        }"#;
        let model: SchemaModel = serde_json::from_str(json).unwrap();

        let users = model.tables.get("public.users").unwrap();
        assert_eq!(users.columns[0].origin, ColumnOrigin::Introspected);
        assert!(!users.columns[0].is_nullable);
        assert!(model.views.contains_key("public.active_users"));
        assert!(model.indexes.is_empty());
    }

    #[test]
    fn test_constraint_kind_from_clause() {
        assert_eq!(ConstraintKind::from_clause(" PRIMARY KEY (id)"), ConstraintKind::PrimaryKey);
        assert_eq!(
            ConstraintKind::from_clause("foreign key (user_id) references users"),
            ConstraintKind::ForeignKey
        );
        assert_eq!(ConstraintKind::from_clause("CHECK (x > 0)"), ConstraintKind::Check);
        assert_eq!(ConstraintKind::from_clause("NOT VALID"), ConstraintKind::Other);
    }
}
