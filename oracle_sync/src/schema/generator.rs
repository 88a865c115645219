//! DDL generator
//!
//! This module renders a [`SchemaDelta`] as an ordered list of Oracle
//! statements, and a [`DataDelta`] as DML.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::config::SyncConfig;
use crate::data::diff::{lookup, DataDelta, Record};
use crate::error::{Error, Result};
use crate::schema::diff::{ColumnChange, ColumnField, SchemaDelta};
use crate::schema::types::{
    ColumnMetadata, ConstraintKind, ConstraintMetadata, IndexMetadata, TableMetadata,
};
use crate::sql::builder::{ValueEncoding, DATE_FORMAT, TIMESTAMP_FORMAT, TIMESTAMP_TZ_FORMAT};
use crate::utils::identifiers::{self, fold, quote, quote_literal};

/// Whether a statement changes structure or rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// Oracle commits DDL implicitly; it cannot be rolled back
    Ddl,
    Dml,
}

/// One generated statement, without a trailing semicolon
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    /// The table the statement acts on
    pub table: String,
    pub kind: StatementKind,
}

impl Statement {
    fn ddl(table: &str, sql: String) -> Self {
        Self {
            sql,
            table: table.to_string(),
            kind: StatementKind::Ddl,
        }
    }

    fn dml(table: &str, sql: String) -> Self {
        Self {
            sql,
            table: table.to_string(),
            kind: StatementKind::Dml,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// What a DDL statement does, for picking the errors a guard may swallow
#[derive(Debug, Clone, Copy)]
enum Action {
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    ModifyColumn,
    AddConstraint,
    DropConstraint,
    CreateIndex,
    DropIndex,
}

impl Action {
    /// SQLCODEs meaning "already done"
    fn ignorable_codes(self) -> &'static [i32] {
        match self {
            // ORA-00955 name is already used by an existing object
            Action::CreateTable | Action::CreateIndex => &[-955],
            // ORA-00942 table or view does not exist
            Action::DropTable => &[-942],
            // ORA-01430 column being added already exists
            Action::AddColumn => &[-1430],
            // ORA-00904 invalid identifier
            Action::DropColumn => &[-904],
            // ORA-01442/01451 column already NOT NULL / NULL
            Action::ModifyColumn => &[-1442, -1451],
            // ORA-02260/02261/02275/02264: key, unique, referential constraint
            // or name already exists
            Action::AddConstraint => &[-2260, -2261, -2275, -2264],
            // ORA-02443 cannot drop constraint, nonexistent constraint
            Action::DropConstraint => &[-2443],
            // ORA-01418 specified index does not exist
            Action::DropIndex => &[-1418],
        }
    }
}

/// Generator settings
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Wrap each DDL statement in a PL/SQL block that ignores "already
    /// exists" or "does not exist" for that statement kind
    pub guard_statements: bool,
    pub allow_table_removal: bool,
    pub allow_column_removal: bool,
    /// Qualify object names with this owner
    pub owner: Option<String>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            guard_statements: false,
            allow_table_removal: true,
            allow_column_removal: true,
            owner: None,
        }
    }
}

impl From<&SyncConfig> for GeneratorOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            guard_statements: config.guard_statements,
            allow_table_removal: config.allow_table_removal,
            allow_column_removal: config.allow_column_removal,
            owner: None,
        }
    }
}

/// Oracle DDL generator
#[derive(Debug, Clone, Default)]
pub struct DdlGenerator {
    options: GeneratorOptions,
}

impl DdlGenerator {
    /// Create a new generator
    pub fn new(options: GeneratorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Generate the statements that apply `delta`
    ///
    /// Drops come first (foreign keys, then indexes and other constraints,
    /// then columns, then tables), creations after, and foreign keys are
    /// added last so every referenced table already exists.
    pub fn generate(&self, delta: &SchemaDelta) -> Result<Vec<Statement>> {
        self.check_renderable(delta)?;

        let mut out = Vec::new();
        let removed_tables: Vec<&TableMetadata> = if self.options.allow_table_removal {
            delta.removed_tables.iter().collect()
        } else {
            for table in &delta.removed_tables {
                tracing::warn!(table = %table.name, "Table removal disabled, keeping table");
            }
            Vec::new()
        };

        // 1. foreign keys
        for table in &removed_tables {
            for fk in table.foreign_keys() {
                let self_reference = fk
                    .referenced_table
                    .as_deref()
                    .is_some_and(|r| identifiers::same(r, &table.name));
                if !self_reference {
                    out.push(self.drop_constraint(&table.name, fk));
                }
            }
        }
        for table in &delta.modified_tables {
            for fk in table
                .removed_constraints
                .iter()
                .filter(|c| c.kind == ConstraintKind::ForeignKey)
            {
                out.push(self.drop_constraint(&table.name, fk));
            }
        }

        // 2. indexes, then other constraints
        for table in &delta.modified_tables {
            for index in &table.removed_indexes {
                out.push(self.drop_index(&table.name, index));
            }
        }
        for table in &delta.modified_tables {
            for constraint in table
                .removed_constraints
                .iter()
                .filter(|c| c.kind != ConstraintKind::ForeignKey)
            {
                out.push(self.drop_constraint(&table.name, constraint));
            }
        }

        // 3. columns
        for table in &delta.modified_tables {
            for column in &table.removed_columns {
                if self.options.allow_column_removal {
                    out.push(self.guarded(
                        &table.name,
                        Action::DropColumn,
                        format!("ALTER TABLE {} DROP COLUMN {}", self.name(&table.name), quote(&column.name)),
                    ));
                } else {
                    tracing::warn!(
                        table = %table.name,
                        column = %column.name,
                        "Column removal disabled, keeping column"
                    );
                }
            }
        }

        // 4. tables, dependents first
        let mut drop_order = dependency_order(&removed_tables);
        drop_order.reverse();
        for table in drop_order {
            out.push(self.guarded(
                &table.name,
                Action::DropTable,
                format!("DROP TABLE {}", self.name(&table.name)),
            ));
        }

        // 5. new tables, referenced tables first
        let added: Vec<&TableMetadata> = delta.added_tables.iter().collect();
        for table in dependency_order(&added) {
            out.push(self.create_table(table)?);
        }

        // 6. new and changed columns
        for table in &delta.modified_tables {
            for column in &table.added_columns {
                out.push(self.guarded(
                    &table.name,
                    Action::AddColumn,
                    format!("ALTER TABLE {} ADD {}", self.name(&table.name), column_definition(column)),
                ));
            }
        }
        for table in &delta.modified_tables {
            for change in &table.modified_columns {
                out.push(self.modify_column(&table.name, change));
            }
        }

        // 7. constraints on existing tables
        for table in &delta.modified_tables {
            for constraint in table
                .added_constraints
                .iter()
                .filter(|c| c.kind != ConstraintKind::ForeignKey)
            {
                out.push(self.add_constraint(&table.name, constraint)?);
            }
        }

        // 8. indexes
        for table in &delta.added_tables {
            for index in &table.indexes {
                out.push(self.create_index(&table.name, index));
            }
        }
        for table in &delta.modified_tables {
            for index in &table.added_indexes {
                out.push(self.create_index(&table.name, index));
            }
        }

        // 9. foreign keys
        for table in &delta.added_tables {
            for fk in table.foreign_keys() {
                out.push(self.add_constraint(&table.name, fk)?);
            }
        }
        for table in &delta.modified_tables {
            for fk in table
                .added_constraints
                .iter()
                .filter(|c| c.kind == ConstraintKind::ForeignKey)
            {
                out.push(self.add_constraint(&table.name, fk)?);
            }
        }

        tracing::info!(statements = out.len(), "Generated DDL");
        Ok(out)
    }

    /// Render a data delta for `table` as DML
    ///
    /// Removed rows are deleted first, then modified rows updated, then
    /// added rows inserted. `columns` gives the target column types so
    /// values read as text are written back through the matching
    /// conversion; columns missing from it are written as plain literals.
    /// LOB values are only known by digest and cannot be written.
    pub fn generate_data(
        &self,
        table: &str,
        columns: &[ColumnMetadata],
        delta: &DataDelta,
    ) -> Result<Vec<Statement>> {
        if delta.key_columns.is_empty() {
            return Err(Error::GenerationError {
                table: table.to_string(),
                message: "data delta has no key columns".to_string(),
            });
        }

        let values = ValueWriter { table, columns };
        let target = self.name(table);
        let mut out = Vec::new();

        for record in &delta.removed {
            let predicate = key_predicate(&values, &delta.key_columns, record)?;
            out.push(Statement::dml(table, format!("DELETE FROM {} WHERE {}", target, predicate)));
        }

        for row in &delta.modified {
            let assignments = row
                .changes
                .iter()
                .map(|c| Ok(format!("{} = {}", quote(&c.field), values.literal(&c.field, &c.to)?)))
                .collect::<Result<Vec<String>>>()?;
            let predicate = key_predicate(&values, &delta.key_columns, &row.key)?;
            out.push(Statement::dml(
                table,
                format!("UPDATE {} SET {} WHERE {}", target, assignments.join(", "), predicate),
            ));
        }

        for record in &delta.added {
            let columns: Vec<String> = record.keys().map(|c| quote(c)).collect();
            let literals = record
                .iter()
                .map(|(column, value)| values.literal(column, value))
                .collect::<Result<Vec<String>>>()?;
            out.push(Statement::dml(
                table,
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    target,
                    columns.join(", "),
                    literals.join(", ")
                ),
            ));
        }

        tracing::info!(table = %table, statements = out.len(), "Generated DML");
        Ok(out)
    }

    /// Fail before emitting anything if some part of the delta cannot be
    /// expressed as Oracle DDL
    fn check_renderable(&self, delta: &SchemaDelta) -> Result<()> {
        for table in &delta.added_tables {
            for constraint in &table.constraints {
                check_constraint(&table.name, constraint)?;
            }
            for index in &table.indexes {
                check_index(&table.name, index)?;
            }
        }
        for table in &delta.modified_tables {
            for constraint in &table.added_constraints {
                check_constraint(&table.name, constraint)?;
            }
            for index in &table.added_indexes {
                check_index(&table.name, index)?;
            }
        }
        Ok(())
    }

    fn name(&self, name: &str) -> String {
        let name = object_name(name);
        match &self.options.owner {
            Some(owner) if !owner.is_empty() && !name.contains('.') => {
                format!("{}.{}", quote(owner), name)
            }
            _ => name,
        }
    }

    fn guarded(&self, table: &str, action: Action, sql: String) -> Statement {
        if !self.options.guard_statements {
            return Statement::ddl(table, sql);
        }

        let codes: Vec<String> = action.ignorable_codes().iter().map(i32::to_string).collect();
        let block = format!(
            "BEGIN\n  EXECUTE IMMEDIATE {};\nEXCEPTION\n  WHEN OTHERS THEN\n    IF SQLCODE NOT IN ({}) THEN\n      RAISE;\n    END IF;\nEND;",
            quote_literal(&sql),
            codes.join(", ")
        );
        Statement::ddl(table, block)
    }

    fn create_table(&self, table: &TableMetadata) -> Result<Statement> {
        let mut lines: Vec<String> = table.columns.iter().map(column_definition).collect();
        for constraint in table
            .constraints
            .iter()
            .filter(|c| c.kind != ConstraintKind::ForeignKey)
        {
            lines.push(self.constraint_clause(&table.name, constraint)?);
        }

        Ok(self.guarded(
            &table.name,
            Action::CreateTable,
            format!("CREATE TABLE {} (\n    {}\n)", self.name(&table.name), lines.join(",\n    ")),
        ))
    }

    fn modify_column(&self, table: &str, change: &ColumnChange) -> Statement {
        let column = &change.to;
        let mut parts = vec![quote(&column.name)];

        if change.type_changed() {
            parts.push(column.type_sql());
        }
        if change.changed(ColumnField::Default) {
            parts.push(format!("DEFAULT {}", column.normalized_default().unwrap_or("NULL")));
        }
        if change.changed(ColumnField::Nullable) {
            parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
        }

        self.guarded(
            table,
            Action::ModifyColumn,
            format!("ALTER TABLE {} MODIFY {}", self.name(table), parts.join(" ")),
        )
    }

    fn add_constraint(&self, table: &str, constraint: &ConstraintMetadata) -> Result<Statement> {
        let clause = self.constraint_clause(table, constraint)?;
        Ok(self.guarded(
            table,
            Action::AddConstraint,
            format!("ALTER TABLE {} ADD {}", self.name(table), clause),
        ))
    }

    fn drop_constraint(&self, table: &str, constraint: &ConstraintMetadata) -> Statement {
        self.guarded(
            table,
            Action::DropConstraint,
            format!("ALTER TABLE {} DROP CONSTRAINT {}", self.name(table), quote(&constraint.name)),
        )
    }

    fn create_index(&self, table: &str, index: &IndexMetadata) -> Statement {
        self.guarded(
            table,
            Action::CreateIndex,
            format!(
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                self.name(&index.name),
                self.name(table),
                column_list(&index.columns)
            ),
        )
    }

    fn drop_index(&self, table: &str, index: &IndexMetadata) -> Statement {
        self.guarded(table, Action::DropIndex, format!("DROP INDEX {}", self.name(&index.name)))
    }

    fn constraint_clause(&self, table: &str, constraint: &ConstraintMetadata) -> Result<String> {
        check_constraint(table, constraint)?;
        // Oracle picks a fresh name for constraints that were unnamed
        let name = if constraint.generated {
            String::new()
        } else {
            format!("CONSTRAINT {} ", quote(&constraint.name))
        };

        let clause = match &constraint.kind {
            ConstraintKind::PrimaryKey => {
                format!("{}PRIMARY KEY ({})", name, column_list(&constraint.columns))
            }
            ConstraintKind::Unique => {
                format!("{}UNIQUE ({})", name, column_list(&constraint.columns))
            }
            ConstraintKind::Check => format!(
                "{}CHECK ({})",
                name,
                constraint.condition.as_deref().unwrap_or_default().trim()
            ),
            ConstraintKind::ForeignKey => {
                let referenced = constraint.referenced_table.as_deref().unwrap_or_default();
                let mut sql = format!(
                    "{}FOREIGN KEY ({}) REFERENCES {}",
                    name,
                    column_list(&constraint.columns),
                    self.name(referenced)
                );
                if !constraint.referenced_columns.is_empty() {
                    sql.push_str(&format!(" ({})", column_list(&constraint.referenced_columns)));
                }
                match constraint.on_delete.as_deref().map(fold).as_deref() {
                    Some("CASCADE") => sql.push_str(" ON DELETE CASCADE"),
                    Some("SET NULL") => sql.push_str(" ON DELETE SET NULL"),
                    _ => {}
                }
                sql
            }
            ConstraintKind::Other(code) => {
                return Err(Error::GenerationError {
                    table: table.to_string(),
                    message: format!("constraint {} has unsupported type {}", constraint.name, code),
                })
            }
        };

        Ok(clause)
    }
}

fn check_constraint(table: &str, constraint: &ConstraintMetadata) -> Result<()> {
    let fail = |message: String| Error::GenerationError {
        table: table.to_string(),
        message,
    };

    match &constraint.kind {
        ConstraintKind::Other(code) => {
            return Err(fail(format!(
                "constraint {} has unsupported type {}",
                constraint.name, code
            )))
        }
        ConstraintKind::ForeignKey if constraint.referenced_table.is_none() => {
            return Err(fail(format!(
                "foreign key {} has no referenced table",
                constraint.name
            )))
        }
        ConstraintKind::Check => {
            if constraint.condition.as_deref().map_or(true, |c| c.trim().is_empty()) {
                return Err(fail(format!("check constraint {} has no condition", constraint.name)));
            }
            return Ok(());
        }
        _ => {}
    }

    if constraint.columns.is_empty() {
        return Err(fail(format!("constraint {} has no columns", constraint.name)));
    }
    Ok(())
}

fn check_index(table: &str, index: &IndexMetadata) -> Result<()> {
    if index.columns.is_empty() {
        return Err(Error::GenerationError {
            table: table.to_string(),
            message: format!("index {} has no columns", index.name),
        });
    }
    Ok(())
}

/// `NAME TYPE[ DEFAULT x][ NOT NULL]`
fn column_definition(column: &ColumnMetadata) -> String {
    let mut sql = format!("{} {}", quote(&column.name), column.type_sql());
    if let Some(default) = column.normalized_default() {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    sql
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

/// Quote a name that may already carry an owner (`HR.EMPLOYEES`)
fn object_name(name: &str) -> String {
    if name.contains('.') && identifiers::is_safe_identifier(name) {
        name.split('.').map(quote).collect::<Vec<_>>().join(".")
    } else {
        quote(name)
    }
}

/// Orders tables so each comes after the tables it references
///
/// Tables caught in a reference cycle keep their input order; their foreign
/// keys are added separately once all tables exist.
fn dependency_order<'a>(tables: &[&'a TableMetadata]) -> Vec<&'a TableMetadata> {
    let names: HashSet<String> = tables.iter().map(|t| fold(&t.name)).collect();
    let mut placed = HashSet::new();
    let mut remaining: Vec<&TableMetadata> = tables.to_vec();
    let mut ordered = Vec::with_capacity(tables.len());

    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|t| {
                t.referenced_tables()
                    .iter()
                    .all(|r| !names.contains(r) || placed.contains(r))
            })
            .unwrap_or(0);
        let table = remaining.remove(next);
        placed.insert(fold(&table.name));
        ordered.push(table);
    }

    ordered
}

/// Render a JSON value as an Oracle literal
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        other => quote_literal(&other.to_string()),
    }
}

/// `TO_CHAR` output that can be spliced in as a numeric literal
fn is_numeric_text(text: &str) -> bool {
    !text.is_empty()
        && text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'E' | 'e'))
        && text.parse::<f64>().is_ok()
}

/// Renders row values for one table according to its column types
struct ValueWriter<'a> {
    table: &'a str,
    columns: &'a [ColumnMetadata],
}

impl ValueWriter<'_> {
    fn literal(&self, column: &str, value: &Value) -> Result<String> {
        let encoding = self
            .columns
            .iter()
            .find(|c| identifiers::same(&c.name, column))
            .map(|c| ValueEncoding::of(&c.data_type));
        let Some(encoding) = encoding else {
            return Ok(literal(value));
        };

        if value.is_null() {
            return Ok("NULL".to_string());
        }
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        Ok(match encoding {
            ValueEncoding::Number if is_numeric_text(&text) => text,
            ValueEncoding::Date => format!("TO_DATE({}, '{}')", quote_literal(&text), DATE_FORMAT),
            ValueEncoding::Timestamp => {
                format!("TO_TIMESTAMP({}, '{}')", quote_literal(&text), TIMESTAMP_FORMAT)
            }
            ValueEncoding::TimestampTz => {
                format!("TO_TIMESTAMP_TZ({}, '{}')", quote_literal(&text), TIMESTAMP_TZ_FORMAT)
            }
            ValueEncoding::Hex => format!("HEXTORAW({})", quote_literal(&text)),
            ValueEncoding::LobDigest => {
                return Err(Error::GenerationError {
                    table: self.table.to_string(),
                    message: format!(
                        "column {} is a LOB compared by digest; its content cannot be written",
                        column
                    ),
                })
            }
            ValueEncoding::Text | ValueEncoding::Number | ValueEncoding::Other => quote_literal(&text),
        })
    }
}

fn key_predicate(values: &ValueWriter<'_>, keys: &[String], record: &Record) -> Result<String> {
    let mut terms = Vec::with_capacity(keys.len());
    for key in keys {
        match lookup(record, key) {
            Some(value) if !value.is_null() => {
                terms.push(format!("{} = {}", quote(key), values.literal(key, value)?))
            }
            _ => {
                return Err(Error::GenerationError {
                    table: values.table.to_string(),
                    message: format!("row has no value for key column {}", key),
                })
            }
        }
    }
    Ok(terms.join(" AND "))
}
