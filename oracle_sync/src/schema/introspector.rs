//! Live schema introspection
//!
//! Reads the Oracle data dictionary (`ALL_*` views) for one owner and builds
//! a [`SchemaSnapshot`]. Every query is bounded by the configured timeout and
//! the caller's cancellation token; transient failures are retried.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::IntrospectionConfig;
use crate::db::bounded::RetryPolicy;
use crate::db::session::{Row, Session};
use crate::error::{Error, Result};
use crate::schema::types::{
    ColumnMetadata, ConstraintKind, ConstraintMetadata, IndexMetadata, SchemaSnapshot, TableMetadata,
};
use crate::utils::identifiers::{fold, normalize_identifier};

const TABLES_SQL: &str = "SELECT table_name \
       FROM all_tables \
      WHERE owner = :1 \
        AND table_name NOT LIKE 'BIN$%' \
      ORDER BY table_name";

const COLUMNS_SQL: &str = "SELECT table_name, column_name, data_type, data_length, char_length, \
            data_precision, data_scale, nullable, data_default \
       FROM all_tab_columns \
      WHERE owner = :1 \
      ORDER BY table_name, column_id";

const CONSTRAINTS_SQL: &str = "SELECT table_name, constraint_name, constraint_type, search_condition, \
            r_owner, r_constraint_name, delete_rule, generated \
       FROM all_constraints \
      WHERE owner = :1 \
      ORDER BY table_name, constraint_name";

const CONS_COLUMNS_SQL: &str = "SELECT constraint_name, table_name, column_name, position \
       FROM all_cons_columns \
      WHERE owner = :1 \
      ORDER BY constraint_name, position";

const INDEXES_SQL: &str = "SELECT index_name, table_name, uniqueness, index_type \
       FROM all_indexes \
      WHERE table_owner = :1 \
      ORDER BY table_name, index_name";

const IND_COLUMNS_SQL: &str = "SELECT index_name, table_name, column_name, column_position \
       FROM all_ind_columns \
      WHERE table_owner = :1 \
      ORDER BY table_name, index_name, column_position";

const REMOTE_KEY_SQL: &str = "SELECT c.table_name, cc.column_name \
       FROM all_constraints c \
       JOIN all_cons_columns cc \
         ON cc.owner = c.owner \
        AND cc.constraint_name = c.constraint_name \
      WHERE c.owner = :1 \
        AND c.constraint_name = :2 \
      ORDER BY cc.position";

/// `"COL" IS NOT NULL`, as Oracle writes it for NOT NULL columns
static NOT_NULL_CHECK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*"?[A-Z0-9_$#]+"?\s+IS\s+NOT\s+NULL\s*$"#)
        .unwrap_or_else(|e| panic!("invalid NOT NULL pattern: {}", e))
});

/// Introspection settings
#[derive(Debug, Clone)]
pub struct IntrospectionOptions {
    pub retry: RetryPolicy,
    /// Bound on each dictionary query
    pub timeout: Duration,
    /// Glob patterns; empty means every table
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
}

impl Default for IntrospectionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(120),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

impl From<&IntrospectionConfig> for IntrospectionOptions {
    fn from(config: &IntrospectionConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.retry_attempts,
                base_delay: Duration::from_millis(config.retry_delay_ms),
            },
            timeout: Duration::from_secs(config.timeout_seconds),
            include_tables: config.include_tables.clone(),
            exclude_tables: config.exclude_tables.clone(),
        }
    }
}

/// Which tables to keep
struct TableFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl TableFilter {
    fn new(options: &IntrospectionOptions) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| {
                        Error::ConfigError(format!("Invalid table pattern '{}': {}", p, e))
                    })
                })
                .collect()
        };
        Ok(Self {
            include: compile(&options.include_tables)?,
            exclude: compile(&options.exclude_tables)?,
        })
    }

    fn keeps(&self, table: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches_with(table, options));
        included && !self.exclude.iter().any(|p| p.matches_with(table, options))
    }
}

/// Constraint as read, before column lists are attached
struct RawConstraint {
    table: String,
    name: String,
    kind: ConstraintKind,
    condition: Option<String>,
    r_owner: Option<String>,
    r_constraint: Option<String>,
    delete_rule: Option<String>,
    generated: bool,
}

/// Reads live schema metadata
pub struct SchemaIntrospector<'a> {
    session: &'a dyn Session,
    options: IntrospectionOptions,
    cancel: CancellationToken,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(session: &'a dyn Session, options: IntrospectionOptions) -> Self {
        Self {
            session,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight queries when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Read every table of `owner`
    ///
    /// Each call goes back to the database.
    pub async fn introspect(&self, owner: &str) -> Result<SchemaSnapshot> {
        let owner = normalize_identifier(owner)
            .filter(|o| !o.contains('.'))
            .ok_or_else(|| Error::ValidationError(format!("invalid owner: {}", owner)))?;
        let filter = TableFilter::new(&self.options)?;

        tracing::info!(owner = %owner, "Introspecting schema");

        let mut tables: BTreeMap<String, TableMetadata> = BTreeMap::new();
        for row in self.query("ALL_TABLES", TABLES_SQL, &owner).await? {
            let name = self.field(&row, "ALL_TABLES", "TABLE_NAME")?;
            if filter.keeps(&name) {
                tables.insert(name.clone(), TableMetadata::new(&name));
            } else {
                tracing::debug!(table = %name, "Table filtered out");
            }
        }

        for row in self.query("ALL_TAB_COLUMNS", COLUMNS_SQL, &owner).await? {
            let table_name = self.field(&row, "ALL_TAB_COLUMNS", "TABLE_NAME")?;
            // Views and filtered tables also appear here
            let Some(table) = tables.get_mut(&table_name) else {
                continue;
            };
            table.columns.push(self.column(&row)?);
        }

        let raw_constraints = self.constraints(&owner, &tables).await?;
        let cons_columns = self.key_columns("ALL_CONS_COLUMNS", CONS_COLUMNS_SQL, &owner, "CONSTRAINT_NAME").await?;

        // Local constraints by name, for resolving foreign key targets
        let local_keys: HashMap<&str, (&str, &[String])> = raw_constraints
            .iter()
            .filter(|c| matches!(c.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique))
            .map(|c| {
                let columns = cons_columns
                    .get(&(c.table.clone(), c.name.clone()))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                (c.name.as_str(), (c.table.as_str(), columns))
            })
            .collect();

        let mut key_backed: HashSet<(String, String)> = HashSet::new();
        for raw in &raw_constraints {
            let mut constraint = ConstraintMetadata {
                name: raw.name.clone(),
                kind: raw.kind.clone(),
                columns: Vec::new(),
                referenced_table: None,
                referenced_columns: Vec::new(),
                on_delete: raw
                    .delete_rule
                    .clone()
                    .filter(|r| r == "CASCADE" || r == "SET NULL"),
                condition: None,
                generated: raw.generated,
            };

            match raw.kind {
                ConstraintKind::Check => constraint.condition = raw.condition.clone(),
                _ => {
                    constraint.columns = cons_columns
                        .get(&(raw.table.clone(), raw.name.clone()))
                        .cloned()
                        .unwrap_or_default();
                }
            }

            if matches!(raw.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique) {
                key_backed.insert((raw.table.clone(), raw.name.clone()));
            }

            if raw.kind == ConstraintKind::ForeignKey {
                let (table, columns) = self.referenced_key(&owner, raw, &local_keys).await?;
                constraint.referenced_table = table;
                constraint.referenced_columns = columns;
            }

            if let Some(table) = tables.get_mut(&raw.table) {
                table.constraints.push(constraint);
            }
        }

        let index_columns = self.key_columns("ALL_IND_COLUMNS", IND_COLUMNS_SQL, &owner, "INDEX_NAME").await?;
        for row in self.query("ALL_INDEXES", INDEXES_SQL, &owner).await? {
            let table_name = self.field(&row, "ALL_INDEXES", "TABLE_NAME")?;
            let name = self.field(&row, "ALL_INDEXES", "INDEX_NAME")?;
            let Some(table) = tables.get_mut(&table_name) else {
                continue;
            };

            let index_type = row.opt_text("INDEX_TYPE").unwrap_or_default();
            if index_type != "NORMAL" && index_type != "BITMAP" {
                tracing::debug!(index = %name, index_type = %index_type, "Skipping index type");
                continue;
            }
            // Primary key and unique constraints create an index of the same name
            if key_backed.contains(&(table_name.clone(), name.clone())) {
                continue;
            }

            let columns = index_columns
                .get(&(table_name.clone(), name.clone()))
                .cloned()
                .unwrap_or_default();
            table.indexes.push(IndexMetadata {
                name,
                columns,
                unique: row.opt_text("UNIQUENESS").as_deref() == Some("UNIQUE"),
            });
        }

        let tables: Vec<TableMetadata> = tables
            .into_values()
            .filter(|t| {
                if t.columns.is_empty() {
                    tracing::warn!(table = %t.name, "Table has no visible columns, skipping");
                }
                !t.columns.is_empty()
            })
            .collect();

        tracing::info!(owner = %owner, tables = tables.len(), "Schema introspected");
        Ok(SchemaSnapshot::new(&owner, tables))
    }

    async fn query(&self, view: &str, sql: &str, owner: &str) -> Result<Vec<Row>> {
        self.query_with(view, sql, &[Value::from(owner)]).await
    }

    async fn query_with(&self, view: &str, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let result = self
            .options
            .retry
            .run(view, self.options.timeout, &self.cancel, || {
                self.session.fetch_all(sql, params)
            })
            .await;

        match result {
            Ok(rows) => {
                tracing::debug!(view, rows = rows.len(), "Dictionary query");
                Ok(rows)
            }
            Err(Error::Cancelled(operation)) => Err(Error::Cancelled(operation)),
            Err(e) => Err(Error::IntrospectionError {
                object: view.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn field(&self, row: &Row, view: &str, column: &str) -> Result<String> {
        row.text(column).map_err(|e| Error::IntrospectionError {
            object: view.to_string(),
            message: e.to_string(),
        })
    }

    fn column(&self, row: &Row) -> Result<ColumnMetadata> {
        let name = self.field(row, "ALL_TAB_COLUMNS", "COLUMN_NAME")?;
        let data_type = self.field(row, "ALL_TAB_COLUMNS", "DATA_TYPE")?;

        let mut column = ColumnMetadata::new(&name, &data_type);
        column.nullable = row.opt_text("NULLABLE").as_deref() != Some("N");
        column.default = row
            .opt_text("DATA_DEFAULT")
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        match data_type.as_str() {
            "VARCHAR2" | "NVARCHAR2" | "VARCHAR" | "CHAR" | "NCHAR" => {
                column.length = row.opt_u32("CHAR_LENGTH").filter(|l| *l > 0);
            }
            "RAW" => column.length = row.opt_u32("DATA_LENGTH"),
            _ => {}
        }
        column.precision = row.opt_u32("DATA_PRECISION");
        column.scale = row.opt_i32("DATA_SCALE");

        Ok(column)
    }

    async fn constraints(
        &self,
        owner: &str,
        tables: &BTreeMap<String, TableMetadata>,
    ) -> Result<Vec<RawConstraint>> {
        let mut out = Vec::new();
        for row in self.query("ALL_CONSTRAINTS", CONSTRAINTS_SQL, owner).await? {
            let table = self.field(&row, "ALL_CONSTRAINTS", "TABLE_NAME")?;
            if !tables.contains_key(&table) {
                continue;
            }

            let name = self.field(&row, "ALL_CONSTRAINTS", "CONSTRAINT_NAME")?;
            let kind = ConstraintKind::from_oracle_code(&self.field(&row, "ALL_CONSTRAINTS", "CONSTRAINT_TYPE")?);
            let condition = row.opt_text("SEARCH_CONDITION");

            let generated = row.opt_text("GENERATED").as_deref() == Some("GENERATED NAME");
            let not_null = condition.as_deref().is_some_and(|c| NOT_NULL_CHECK.is_match(c));
            if kind == ConstraintKind::Check && generated && not_null {
                continue;
            }

            out.push(RawConstraint {
                table,
                name,
                kind,
                condition,
                r_owner: row.opt_text("R_OWNER"),
                r_constraint: row.opt_text("R_CONSTRAINT_NAME"),
                delete_rule: row.opt_text("DELETE_RULE"),
                generated,
            });
        }
        Ok(out)
    }

    /// Ordered column lists keyed by (table, object name)
    async fn key_columns(
        &self,
        view: &str,
        sql: &str,
        owner: &str,
        name_column: &str,
    ) -> Result<HashMap<(String, String), Vec<String>>> {
        let mut out: HashMap<(String, String), Vec<String>> = HashMap::new();
        for row in self.query(view, sql, owner).await? {
            let key = (self.field(&row, view, "TABLE_NAME")?, self.field(&row, view, name_column)?);
            out.entry(key).or_default().push(self.field(&row, view, "COLUMN_NAME")?);
        }
        Ok(out)
    }

    /// Referenced table and columns of a foreign key
    ///
    /// Keys in another schema are looked up there and reported as
    /// `OWNER.TABLE`.
    async fn referenced_key(
        &self,
        owner: &str,
        raw: &RawConstraint,
        local_keys: &HashMap<&str, (&str, &[String])>,
    ) -> Result<(Option<String>, Vec<String>)> {
        let Some(r_constraint) = raw.r_constraint.as_deref() else {
            return Ok((None, Vec::new()));
        };
        let r_owner = raw.r_owner.as_deref().unwrap_or(owner);

        if fold(r_owner) == fold(owner) {
            if let Some((table, columns)) = local_keys.get(r_constraint) {
                return Ok((Some(table.to_string()), columns.to_vec()));
            }
        }

        let rows = self
            .query_with(
                "ALL_CONSTRAINTS",
                REMOTE_KEY_SQL,
                &[Value::from(r_owner), Value::from(r_constraint)],
            )
            .await?;
        let Some(first) = rows.first() else {
            tracing::warn!(
                constraint = %raw.name,
                referenced = %r_constraint,
                "Referenced key not visible, leaving foreign key unresolved"
            );
            return Ok((None, Vec::new()));
        };

        let table = self.field(first, "ALL_CONSTRAINTS", "TABLE_NAME")?;
        let columns = rows
            .iter()
            .map(|r| self.field(r, "ALL_CONS_COLUMNS", "COLUMN_NAME"))
            .collect::<Result<Vec<_>>>()?;
        let table = if fold(r_owner) == fold(owner) {
            table
        } else {
            format!("{}.{}", fold(r_owner), table)
        };
        Ok((Some(table), columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_filter() {
        let options = IntrospectionOptions {
            include_tables: vec!["ORD*".to_string(), "customers".to_string()],
            exclude_tables: vec!["*_ARCHIVE".to_string()],
            ..Default::default()
        };
        let filter = TableFilter::new(&options).unwrap();
        assert!(filter.keeps("ORDERS"));
        assert!(filter.keeps("CUSTOMERS"));
        assert!(!filter.keeps("ORDERS_ARCHIVE"));
        assert!(!filter.keeps("INVOICES"));
    }

    #[test]
    fn test_invalid_pattern_is_a_config_error() {
        let options = IntrospectionOptions {
            include_tables: vec!["[".to_string()],
            ..Default::default()
        };
        assert!(matches!(TableFilter::new(&options), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_not_null_checks_are_recognised() {
        assert!(NOT_NULL_CHECK.is_match("\"ID\" IS NOT NULL"));
        assert!(NOT_NULL_CHECK.is_match("STATUS is not null"));
        assert!(!NOT_NULL_CHECK.is_match("AMOUNT > 0"));
    }
}
