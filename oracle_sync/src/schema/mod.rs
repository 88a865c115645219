//! Schema module for oracle_sync
//!
//! This module handles schema introspection, comparison and DDL generation.

pub mod diff;
pub mod generator;
pub mod introspector;
pub mod store;
pub mod types;

// Re-export key types
pub use diff::{ColumnChange, ColumnField, SchemaDelta, SchemaDiffer, TableDelta};
pub use generator::{DdlGenerator, GeneratorOptions, Statement, StatementKind};
pub use introspector::{IntrospectionOptions, SchemaIntrospector};
pub use types::{
    ColumnMetadata, ConstraintKind, ConstraintMetadata, IndexMetadata, SchemaSnapshot,
    TableMetadata,
};
