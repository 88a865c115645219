//! Fetching table rows for comparison

use serde_json::Value;

use crate::data::diff::Record;
use crate::db::session::Session;
use crate::error::{Error, Result};
use crate::schema::types::ColumnMetadata;
use crate::sql::builder::{text_expression, SelectBuilder};
use crate::utils::identifiers::{is_suspicious_where_clause, normalize_identifier};

const TABLE_COLUMNS_SQL: &str = "SELECT column_name, data_type \
       FROM all_tab_columns \
      WHERE owner = :1 AND table_name = :2 \
      ORDER BY column_id";

const PRIMARY_KEY_SQL: &str = "SELECT acc.column_name \
       FROM all_cons_columns acc \
       JOIN all_constraints ac \
         ON acc.owner = ac.owner \
        AND acc.constraint_name = ac.constraint_name \
      WHERE ac.constraint_type = 'P' \
        AND acc.owner = :1 \
        AND acc.table_name = :2 \
      ORDER BY acc.position";

fn checked(kind: &str, name: &str) -> Result<String> {
    normalize_identifier(name)
        .filter(|n| !n.contains('.'))
        .ok_or_else(|| Error::ValidationError(format!("invalid {} identifier: {}", kind, name)))
}

/// Primary key columns of `owner.table`, in key order
pub async fn primary_key_columns(session: &dyn Session, owner: &str, table: &str) -> Result<Vec<String>> {
    let owner = checked("owner", owner)?;
    let table = checked("table", table)?;

    let rows = session
        .fetch_all(PRIMARY_KEY_SQL, &[Value::from(owner), Value::from(table)])
        .await?;
    rows.iter().map(|row| row.text("COLUMN_NAME")).collect()
}

/// Columns of `owner.table` with their dictionary types, in column order
pub async fn table_columns(session: &dyn Session, owner: &str, table: &str) -> Result<Vec<ColumnMetadata>> {
    let owner = checked("owner", owner)?;
    let table = checked("table", table)?;

    session
        .fetch_all(TABLE_COLUMNS_SQL, &[Value::from(owner), Value::from(table)])
        .await?
        .iter()
        .map(|row| -> Result<ColumnMetadata> {
            Ok(ColumnMetadata::new(&row.text("COLUMN_NAME")?, &row.text("DATA_TYPE")?))
        })
        .collect()
}

/// Fetch rows of `owner.table` as text records keyed by upper-cased column
/// name
///
/// `columns` restricts the selection (all columns when empty). The optional
/// filter is free-form but refused when it carries statement separators,
/// comments or data and definition keywords.
pub async fn fetch_rows(
    session: &dyn Session,
    owner: &str,
    table: &str,
    columns: &[String],
    where_clause: Option<&str>,
) -> Result<Vec<Record>> {
    let owner = checked("owner", owner)?;
    let table = checked("table", table)?;

    if let Some(clause) = where_clause {
        if is_suspicious_where_clause(clause) {
            return Err(Error::ValidationError(format!(
                "refusing suspicious WHERE clause: {}",
                clause
            )));
        }
    }

    let available = table_columns(session, &owner, &table).await?;

    if available.is_empty() {
        return Err(Error::ValidationError(format!("table {}.{} not found", owner, table)));
    }

    let selected: Vec<&ColumnMetadata> = if columns.is_empty() {
        available.iter().collect()
    } else {
        let mut selected = Vec::with_capacity(columns.len());
        for name in columns {
            let column = available
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| {
                    Error::ValidationError(format!("column {} not found on {}.{}", name, owner, table))
                })?;
            selected.push(column);
        }
        selected
    };

    let mut builder = SelectBuilder::new(&table).owner(&owner);
    for column in selected {
        builder = builder.column(text_expression(column)?);
    }
    if let Some(clause) = where_clause {
        builder = builder.filter(clause);
    }
    let sql = builder.build()?;

    tracing::debug!(owner = %owner, table = %table, "Fetching rows");
    let rows = session.fetch_all(&sql, &[]).await?;
    tracing::info!(owner = %owner, table = %table, rows = rows.len(), "Fetched rows");

    Ok(rows.into_iter().map(|row| row.into_record()).collect())
}
