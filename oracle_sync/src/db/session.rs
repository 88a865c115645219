//! Driver contract
//!
//! Everything above the driver talks to the database through [`Session`]. The
//! contract is narrow: run a statement, fetch rows, and end the
//! current transaction.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{Error, Result};

/// A database session owned by one caller at a time
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute a statement, returning the affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query and collect every row
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a query and return the first row, if any
    async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    /// Commit the current transaction
    async fn commit(&self) -> Result<()>;

    /// Roll back the current transaction
    async fn rollback(&self) -> Result<()>;
}

/// One result row, keyed by upper-cased column name in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used by drivers and tests
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<Value>) {
        self.values.insert(column.to_uppercase(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(&column.to_uppercase())
    }

    /// A required text column
    pub fn text(&self, column: &str) -> Result<String> {
        self.opt_text(column).ok_or_else(|| {
            Error::DatabaseError(format!("column {} is missing or null", column.to_uppercase()))
        })
    }

    /// An optional text column; numbers are rendered as text
    pub fn opt_text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// An optional non-negative integer column
    ///
    /// Drivers that return everything as text are accepted, so `"20"` and
    /// `20` both read as 20.
    pub fn opt_u32(&self, column: &str) -> Option<u32> {
        match self.get(column)? {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// An optional signed integer column
    pub fn opt_i32(&self, column: &str) -> Option<i32> {
        match self.get(column)? {
            Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Convert into a JSON object map, preserving column order
    pub fn into_record(self) -> serde_json::Map<String, Value> {
        self.values.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(&column, value);
        }
        row
    }
}
