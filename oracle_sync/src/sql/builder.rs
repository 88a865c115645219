//! SELECT construction for row fetches
//!
//! Only identifiers that pass [`is_safe_identifier`] are spliced into the
//! statement text; values travel as binds.

use crate::error::{Error, Result};
use crate::schema::types::ColumnMetadata;
use crate::utils::identifiers::{is_safe_identifier, is_suspicious_where_clause, normalize_identifier};

/// Builds a `SELECT` over one table
#[derive(Debug, Clone, Default)]
pub struct SelectBuilder {
    owner: Option<String>,
    table: String,
    columns: Vec<String>,
    filter: Option<String>,
    order_by: Vec<String>,
}

impl SelectBuilder {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    /// Add a select expression, e.g. from [`text_expression`]
    pub fn column(mut self, expression: impl Into<String>) -> Self {
        self.columns.push(expression.into());
        self
    }

    /// Free-form filter, checked when the statement is built
    pub fn filter(mut self, clause: &str) -> Self {
        let clause = clause.trim();
        if !clause.is_empty() {
            self.filter = Some(clause.to_string());
        }
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push(column.to_string());
        self
    }

    pub fn build(&self) -> Result<String> {
        let table = normalize_identifier(&self.table)
            .ok_or_else(|| Error::ValidationError(format!("invalid table name: {}", self.table)))?;
        let target = match &self.owner {
            Some(owner) => {
                let owner = normalize_identifier(owner)
                    .filter(|o| !o.contains('.'))
                    .ok_or_else(|| Error::ValidationError(format!("invalid owner: {}", owner)))?;
                format!("{}.{}", owner, table)
            }
            None => table,
        };

        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", columns, target);

        if let Some(filter) = &self.filter {
            if is_suspicious_where_clause(filter) {
                return Err(Error::ValidationError(format!(
                    "refusing suspicious WHERE clause: {}",
                    filter
                )));
            }
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }

        if !self.order_by.is_empty() {
            let mut keys = Vec::with_capacity(self.order_by.len());
            for column in &self.order_by {
                keys.push(
                    normalize_identifier(column)
                        .filter(|c| !c.contains('.'))
                        .ok_or_else(|| {
                            Error::ValidationError(format!("invalid order column: {}", column))
                        })?,
                );
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        Ok(sql)
    }
}

/// Format of DATE values read as text
pub const DATE_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS";
/// Format of TIMESTAMP and TIMESTAMP WITH LOCAL TIME ZONE values read as text
pub const TIMESTAMP_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS.FF";
/// Format of TIMESTAMP WITH TIME ZONE values read as text
pub const TIMESTAMP_TZ_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS.FF TZH:TZM";

/// How the values of a column are carried as text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Character data, read as is
    Text,
    /// `TO_CHAR` of a numeric type
    Number,
    /// [`DATE_FORMAT`]
    Date,
    /// [`TIMESTAMP_FORMAT`]
    Timestamp,
    /// [`TIMESTAMP_TZ_FORMAT`]
    TimestampTz,
    /// Hex encoded RAW
    Hex,
    /// SHA-1 digest of a CLOB, NCLOB or BLOB; the content itself is never read
    LobDigest,
    /// Anything else, through `TO_CHAR`
    Other,
}

impl ValueEncoding {
    /// Pick the encoding for an `ALL_TAB_COLUMNS.DATA_TYPE`
    pub fn of(data_type: &str) -> Self {
        let data_type = data_type.trim().to_uppercase();
        match data_type.as_str() {
            "CHAR" | "VARCHAR2" | "VARCHAR" | "NCHAR" | "NVARCHAR2" => ValueEncoding::Text,
            "NUMBER" | "FLOAT" | "INTEGER" | "BINARY_FLOAT" | "BINARY_DOUBLE" => ValueEncoding::Number,
            "DATE" => ValueEncoding::Date,
            "CLOB" | "NCLOB" | "BLOB" => ValueEncoding::LobDigest,
            "RAW" => ValueEncoding::Hex,
            t if t.starts_with("TIMESTAMP") && t.ends_with("WITH TIME ZONE") => ValueEncoding::TimestampTz,
            t if t.starts_with("TIMESTAMP") => ValueEncoding::Timestamp,
            t if t.starts_with("NUMBER") || t.starts_with("FLOAT") => ValueEncoding::Number,
            _ => ValueEncoding::Other,
        }
    }
}

/// A select expression rendering a column as comparable text, aliased to
/// the upper-cased column name
///
/// Dates and timestamps get a fixed format and binary data is hex encoded,
/// so both sides of a comparison read the same text. LOBs are compared on a
/// digest of their full content.
pub fn text_expression(column: &ColumnMetadata) -> Result<String> {
    if !is_safe_identifier(&column.name) || column.name.contains('.') {
        return Err(Error::ValidationError(format!("invalid column name: {}", column.name)));
    }
    let name = column.name.to_uppercase();

    let expression = match ValueEncoding::of(&column.data_type) {
        ValueEncoding::Text => name.clone(),
        ValueEncoding::Number | ValueEncoding::Other => format!("TO_CHAR({})", name),
        ValueEncoding::Date => format!("TO_CHAR({}, '{}')", name, DATE_FORMAT),
        ValueEncoding::Timestamp => format!("TO_CHAR({}, '{}')", name, TIMESTAMP_FORMAT),
        ValueEncoding::TimestampTz => format!("TO_CHAR({}, '{}')", name, TIMESTAMP_TZ_FORMAT),
        ValueEncoding::Hex => format!("RAWTOHEX({})", name),
        // DBMS_CRYPTO.HASH rejects empty LOBs; those read as NULL
        ValueEncoding::LobDigest => format!(
            "CASE WHEN DBMS_LOB.GETLENGTH({0}) > 0 THEN RAWTOHEX(DBMS_CRYPTO.HASH({0}, 3)) END",
            name
        ),
    };

    Ok(format!("{} AS {}", expression, name))
}
