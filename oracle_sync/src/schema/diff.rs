//! Schema difference calculator
//!
//! This module compares two schema snapshots and calculates the change set
//! that turns the first into the second.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::types::{
    ColumnMetadata, ConstraintMetadata, IndexMetadata, SchemaSnapshot, TableMetadata,
};
use crate::utils::identifiers::fold;

/// One aspect of a column definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnField {
    DataType,
    Nullable,
    Default,
    Length,
    Precision,
    Scale,
}

impl fmt::Display for ColumnField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnField::DataType => "data type",
            ColumnField::Nullable => "nullability",
            ColumnField::Default => "default",
            ColumnField::Length => "length",
            ColumnField::Precision => "precision",
            ColumnField::Scale => "scale",
        };
        f.write_str(name)
    }
}

/// A column present on both sides with a different definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnChange {
    pub from: ColumnMetadata,
    pub to: ColumnMetadata,
    pub fields: Vec<ColumnField>,
}

impl ColumnChange {
    /// Compare two definitions of the same column
    pub fn between(from: &ColumnMetadata, to: &ColumnMetadata) -> Option<Self> {
        let mut fields = Vec::new();

        if !from.data_type.trim().eq_ignore_ascii_case(to.data_type.trim()) {
            fields.push(ColumnField::DataType);
        }
        if from.nullable != to.nullable {
            fields.push(ColumnField::Nullable);
        }
        if from.normalized_default() != to.normalized_default() {
            fields.push(ColumnField::Default);
        }
        if from.length != to.length {
            fields.push(ColumnField::Length);
        }
        if from.precision != to.precision {
            fields.push(ColumnField::Precision);
        }
        if from.scale != to.scale {
            fields.push(ColumnField::Scale);
        }

        if fields.is_empty() {
            None
        } else {
            Some(Self {
                from: from.clone(),
                to: to.clone(),
                fields,
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.to.name
    }

    pub fn changed(&self, field: ColumnField) -> bool {
        self.fields.contains(&field)
    }

    /// Whether the rendered type differs
    pub fn type_changed(&self) -> bool {
        self.changed(ColumnField::DataType)
            || self.changed(ColumnField::Length)
            || self.changed(ColumnField::Precision)
            || self.changed(ColumnField::Scale)
    }

    fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            fields: self.fields.clone(),
        }
    }
}

/// Changes within one table present on both sides
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableDelta {
    pub name: String,
    pub added_columns: Vec<ColumnMetadata>,
    pub removed_columns: Vec<ColumnMetadata>,
    pub modified_columns: Vec<ColumnChange>,
    pub added_constraints: Vec<ConstraintMetadata>,
    pub removed_constraints: Vec<ConstraintMetadata>,
    pub added_indexes: Vec<IndexMetadata>,
    pub removed_indexes: Vec<IndexMetadata>,
}

impl TableDelta {
    fn between(source: &TableMetadata, target: &TableMetadata) -> Self {
        let source_columns: HashMap<String, &ColumnMetadata> =
            source.columns.iter().map(|c| (fold(&c.name), c)).collect();
        let target_columns: HashSet<String> = target.columns.iter().map(|c| fold(&c.name)).collect();

        let added_columns = target
            .columns
            .iter()
            .filter(|c| !source_columns.contains_key(&fold(&c.name)))
            .cloned()
            .collect();

        let removed_columns = source
            .columns
            .iter()
            .filter(|c| !target_columns.contains(&fold(&c.name)))
            .cloned()
            .collect();

        let mut modified_columns: Vec<ColumnChange> = target
            .columns
            .iter()
            .filter_map(|to| {
                let from = source_columns.get(&fold(&to.name))?;
                ColumnChange::between(from, to)
            })
            .collect();
        modified_columns.sort_by_key(|c| fold(c.name()));

        // Constraints and indexes are matched by name and definition; a
        // changed definition under the same name is a drop plus a create.
        // System-generated constraint names are not compared.
        let added_constraints = target
            .constraints
            .iter()
            .filter(|t| !source.constraints.iter().any(|s| s.same_definition(t)))
            .cloned()
            .collect();

        let removed_constraints = source
            .constraints
            .iter()
            .filter(|s| !target.constraints.iter().any(|t| s.same_definition(t)))
            .cloned()
            .collect();

        let added_indexes = target
            .indexes
            .iter()
            .filter(|t| !source.indexes.iter().any(|s| s.same_definition(t)))
            .cloned()
            .collect();

        let removed_indexes = source
            .indexes
            .iter()
            .filter(|s| !target.indexes.iter().any(|t| s.same_definition(t)))
            .cloned()
            .collect();

        Self {
            name: target.name.clone(),
            added_columns,
            removed_columns,
            modified_columns,
            added_constraints,
            removed_constraints,
            added_indexes,
            removed_indexes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.modified_columns.is_empty()
            && self.added_constraints.is_empty()
            && self.removed_constraints.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
    }

    fn inverse(&self) -> Self {
        Self {
            name: self.name.clone(),
            added_columns: self.removed_columns.clone(),
            removed_columns: self.added_columns.clone(),
            modified_columns: self.modified_columns.iter().map(ColumnChange::inverse).collect(),
            added_constraints: self.removed_constraints.clone(),
            removed_constraints: self.added_constraints.clone(),
            added_indexes: self.removed_indexes.clone(),
            removed_indexes: self.added_indexes.clone(),
        }
    }

    fn apply_to(&self, table: &TableMetadata) -> Result<TableMetadata> {
        let mut table = table.clone();

        for column in &self.removed_columns {
            let before = table.columns.len();
            table.columns.retain(|c| fold(&c.name) != fold(&column.name));
            if table.columns.len() == before {
                return Err(missing(&table.name, "column", &column.name));
            }
        }
        for change in &self.modified_columns {
            let slot = table
                .columns
                .iter_mut()
                .find(|c| fold(&c.name) == fold(change.name()))
                .ok_or_else(|| missing(&self.name, "column", change.name()))?;
            *slot = change.to.clone();
        }
        for column in &self.added_columns {
            if table.column(&column.name).is_some() {
                return Err(Error::ComparisonError(format!(
                    "column {}.{} already exists",
                    self.name, column.name
                )));
            }
            table.columns.push(column.clone());
        }

        for constraint in &self.removed_constraints {
            let before = table.constraints.len();
            table.constraints.retain(|c| fold(&c.name) != fold(&constraint.name));
            if table.constraints.len() == before {
                return Err(missing(&self.name, "constraint", &constraint.name));
            }
        }
        table.constraints.extend(self.added_constraints.iter().cloned());

        for index in &self.removed_indexes {
            let before = table.indexes.len();
            table.indexes.retain(|i| fold(&i.name) != fold(&index.name));
            if table.indexes.len() == before {
                return Err(missing(&self.name, "index", &index.name));
            }
        }
        table.indexes.extend(self.added_indexes.iter().cloned());

        Ok(table)
    }
}

fn missing(table: &str, kind: &str, name: &str) -> Error {
    Error::ComparisonError(format!("{} {} not found on table {}", kind, name, table))
}

/// The change set turning one schema into another
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaDelta {
    /// Tables only in the target, in target order
    pub added_tables: Vec<TableMetadata>,
    /// Tables only in the source, in source order
    pub removed_tables: Vec<TableMetadata>,
    /// Tables on both sides that differ, sorted by name
    pub modified_tables: Vec<TableDelta>,
}

impl SchemaDelta {
    pub fn is_empty(&self) -> bool {
        self.added_tables.is_empty() && self.removed_tables.is_empty() && self.modified_tables.is_empty()
    }

    /// The delta that undoes this one
    pub fn inverse(&self) -> Self {
        let mut modified_tables: Vec<TableDelta> =
            self.modified_tables.iter().map(TableDelta::inverse).collect();
        modified_tables.sort_by_key(|t| fold(&t.name));
        Self {
            added_tables: self.removed_tables.clone(),
            removed_tables: self.added_tables.clone(),
            modified_tables,
        }
    }

    /// Replay the delta against a snapshot
    ///
    /// Columns added to an existing table land at the end, the way
    /// `ALTER TABLE ... ADD` places them.
    pub fn apply_to(&self, snapshot: &SchemaSnapshot) -> Result<SchemaSnapshot> {
        let removed: HashSet<String> = self.removed_tables.iter().map(|t| fold(&t.name)).collect();

        for name in &removed {
            if snapshot.table(name).is_none() {
                return Err(missing(snapshot.owner(), "table", name));
            }
        }

        let mut tables = Vec::with_capacity(snapshot.tables().len() + self.added_tables.len());
        for table in snapshot.tables() {
            if removed.contains(&fold(&table.name)) {
                continue;
            }
            match self.modified_tables.iter().find(|d| fold(&d.name) == fold(&table.name)) {
                Some(delta) => tables.push(delta.apply_to(table)?),
                None => tables.push(table.clone()),
            }
        }

        for delta in &self.modified_tables {
            if !tables.iter().any(|t| fold(&t.name) == fold(&delta.name)) {
                return Err(missing(snapshot.owner(), "table", &delta.name));
            }
        }

        for table in &self.added_tables {
            if tables.iter().any(|t| fold(&t.name) == fold(&table.name)) {
                return Err(Error::ComparisonError(format!(
                    "table {} already exists in {}",
                    table.name,
                    snapshot.owner()
                )));
            }
            tables.push(table.clone());
        }

        Ok(SchemaSnapshot::new(snapshot.owner(), tables))
    }

    /// Counts for log lines and summaries: (added, removed, modified)
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.added_tables.len(),
            self.removed_tables.len(),
            self.modified_tables.len(),
        )
    }
}

/// Compares schema snapshots
pub struct SchemaDiffer;

impl SchemaDiffer {
    /// Calculate the changes that turn `source` into `target`
    ///
    /// Both snapshots must pass [`SchemaSnapshot::validate`]; an incomplete
    /// snapshot is an error rather than an empty schema.
    pub fn diff(source: &SchemaSnapshot, target: &SchemaSnapshot) -> Result<SchemaDelta> {
        source.validate()?;
        target.validate()?;

        let added_tables: Vec<TableMetadata> = target
            .tables()
            .iter()
            .filter(|t| source.table(&t.name).is_none())
            .cloned()
            .collect();

        let removed_tables: Vec<TableMetadata> = source
            .tables()
            .iter()
            .filter(|t| target.table(&t.name).is_none())
            .cloned()
            .collect();

        let mut modified_tables: Vec<TableDelta> = target
            .tables()
            .iter()
            .filter_map(|t| {
                let s = source.table(&t.name)?;
                let delta = TableDelta::between(s, t);
                (!delta.is_empty()).then_some(delta)
            })
            .collect();
        modified_tables.sort_by_key(|t| fold(&t.name));

        tracing::debug!(
            source = source.owner(),
            target = target.owner(),
            added = added_tables.len(),
            removed = removed_tables.len(),
            modified = modified_tables.len(),
            "Schema diff calculated"
        );

        Ok(SchemaDelta {
            added_tables,
            removed_tables,
            modified_tables,
        })
    }
}
