//! Schema model and the live-snapshot boundary.

pub mod model;
pub mod snapshot;

pub use model::{
    Column, ColumnOrigin, Constraint, ConstraintKind, DEFAULT_SCHEMA, Entity, EntityMap, Index,
    PLACEHOLDER_TYPE, Policy, SchemaModel, Table, Trigger, View, index_key, policy_key,
    table_key, trigger_key, view_key,
};
pub use snapshot::{SchemaIntrospector, SnapshotFile};
