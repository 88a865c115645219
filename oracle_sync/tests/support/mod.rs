//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use oracle_sync::schema::{ColumnMetadata, ConstraintMetadata, IndexMetadata, TableMetadata};
use oracle_sync::{Error, Result, Row, SchemaSnapshot, Session};

/// Something the session was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Query(String),
    Execute(String),
    Commit,
    Rollback,
}

struct Failure {
    fragment: String,
    message: String,
    transient: bool,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    responses: Vec<(String, Vec<Row>)>,
    failures: Vec<Failure>,
    fail_commit: bool,
    events: Vec<Event>,
}

/// In-memory [`Session`] answering queries from canned rows
///
/// Queries are matched by the first registered fragment they contain, case
/// insensitively; unmatched queries return no rows. Clones share state, so a
/// test can keep a handle on a session it has boxed away.
#[derive(Clone, Default)]
pub struct ScriptedSession {
    state: Arc<Mutex<State>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries containing `fragment` with `rows`
    pub fn on(self, fragment: &str, rows: Vec<Row>) -> Self {
        self.lock().responses.push((fragment.to_lowercase(), rows));
        self
    }

    /// Fail every statement containing `fragment`
    pub fn fail_on(self, fragment: &str, message: &str) -> Self {
        self.push_failure(fragment, message, false, None)
    }

    /// Fail the next `times` statements containing `fragment` with a
    /// connection error
    pub fn drop_connection_on(self, fragment: &str, times: usize) -> Self {
        self.push_failure(fragment, "ORA-03113: end-of-file on communication channel", true, Some(times))
    }

    pub fn fail_commit(self) -> Self {
        self.lock().fail_commit = true;
        self
    }

    fn push_failure(self, fragment: &str, message: &str, transient: bool, remaining: Option<usize>) -> Self {
        self.lock().failures.push(Failure {
            fragment: fragment.to_lowercase(),
            message: message.to_string(),
            transient,
            remaining,
        });
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    /// Statements passed to `execute`, in order
    pub fn executed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn queries_matching(&self, fragment: &str) -> usize {
        let fragment = fragment.to_lowercase();
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Query(sql) if sql.to_lowercase().contains(&fragment)))
            .count()
    }

    fn check_failure(state: &mut State, sql: &str) -> Result<()> {
        let sql = sql.to_lowercase();
        let Some(failure) = state.failures.iter_mut().find(|f| {
            sql.contains(&f.fragment) && f.remaining.map_or(true, |n| n > 0)
        }) else {
            return Ok(());
        };

        if let Some(n) = failure.remaining.as_mut() {
            *n -= 1;
        }
        if failure.transient {
            Err(Error::ConnectionError(failure.message.clone()))
        } else {
            Err(Error::DatabaseError(failure.message.clone()))
        }
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64> {
        let mut state = self.lock();
        state.events.push(Event::Execute(sql.to_string()));
        Self::check_failure(&mut state, sql)?;
        Ok(1)
    }

    async fn fetch_all(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.lock();
        state.events.push(Event::Query(sql.to_string()));
        Self::check_failure(&mut state, sql)?;

        let lowered = sql.to_lowercase();
        Ok(state
            .responses
            .iter()
            .find(|(fragment, _)| lowered.contains(fragment))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.lock();
        state.events.push(Event::Commit);
        if state.fail_commit {
            return Err(Error::DatabaseError("ORA-02091: transaction rolled back".to_string()));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.lock().events.push(Event::Rollback);
        Ok(())
    }
}

pub fn customers() -> TableMetadata {
    TableMetadata::new("CUSTOMERS")
        .with_column(ColumnMetadata::new("ID", "NUMBER").precision(10, 0).nullable(false))
        .with_column(ColumnMetadata::new("NAME", "VARCHAR2").length(100))
        .with_constraint(ConstraintMetadata::primary_key("PK_CUSTOMERS", &["ID"]))
}

pub fn orders() -> TableMetadata {
    TableMetadata::new("ORDERS")
        .with_column(ColumnMetadata::new("ID", "NUMBER").precision(10, 0).nullable(false))
        .with_column(ColumnMetadata::new("CUSTOMER_ID", "NUMBER").precision(10, 0))
        .with_constraint(ConstraintMetadata::primary_key("PK_ORDERS", &["ID"]))
        .with_constraint(
            ConstraintMetadata::foreign_key("FK_ORDERS_CUSTOMER", &["CUSTOMER_ID"], "CUSTOMERS", &["ID"])
                .on_delete("CASCADE"),
        )
        .with_index(IndexMetadata::new("IX_ORDERS_CUSTOMER", &["CUSTOMER_ID"], false))
}

pub fn snapshot(tables: Vec<TableMetadata>) -> SchemaSnapshot {
    SchemaSnapshot::new("APP", tables)
}

/// Canned dictionary rows for an `APP` schema holding CUSTOMERS and ORDERS
pub fn dictionary() -> ScriptedSession {
    ScriptedSession::new()
        .on(
            "from all_tables",
            vec![
                Row::new().with("TABLE_NAME", "CUSTOMERS"),
                Row::new().with("TABLE_NAME", "ORDERS"),
            ],
        )
        .on(
            "from all_tab_columns",
            vec![
                column_row("CUSTOMERS", "ID", "NUMBER", Some(10), "N", None),
                column_row("CUSTOMERS", "NAME", "VARCHAR2", None, "Y", None).with("CHAR_LENGTH", 100),
                column_row("ORDERS", "ID", "NUMBER", Some(10), "N", None),
                column_row("ORDERS", "CUSTOMER_ID", "NUMBER", Some(10), "Y", None),
                column_row("ORDERS", "STATUS", "VARCHAR2", None, "Y", Some("'NEW'\n"))
                    .with("CHAR_LENGTH", "20"),
            ],
        )
        .on(
            "from all_constraints",
            vec![
                constraint_row("CUSTOMERS", "PK_CUSTOMERS", "P"),
                constraint_row("CUSTOMERS", "SYS_C0011", "C")
                    .with("SEARCH_CONDITION", "\"ID\" IS NOT NULL")
                    .with("GENERATED", "GENERATED NAME"),
                constraint_row("ORDERS", "CK_ORDERS_STATUS", "C")
                    .with("SEARCH_CONDITION", "STATUS IN ('NEW', 'DONE')"),
                constraint_row("ORDERS", "FK_ORDERS_CUSTOMER", "R")
                    .with("R_OWNER", "APP")
                    .with("R_CONSTRAINT_NAME", "PK_CUSTOMERS")
                    .with("DELETE_RULE", "CASCADE"),
                constraint_row("ORDERS", "PK_ORDERS", "P"),
            ],
        )
        .on(
            "from all_cons_columns",
            vec![
                key_column_row("CONSTRAINT_NAME", "FK_ORDERS_CUSTOMER", "ORDERS", "CUSTOMER_ID"),
                key_column_row("CONSTRAINT_NAME", "PK_CUSTOMERS", "CUSTOMERS", "ID"),
                key_column_row("CONSTRAINT_NAME", "PK_ORDERS", "ORDERS", "ID"),
            ],
        )
        .on(
            "from all_indexes",
            vec![
                index_row("PK_CUSTOMERS", "CUSTOMERS", "UNIQUE", "NORMAL"),
                index_row("IX_ORDERS_CUSTOMER", "ORDERS", "NONUNIQUE", "NORMAL"),
                index_row("PK_ORDERS", "ORDERS", "UNIQUE", "NORMAL"),
                index_row("SYS_IL0000012345C00003$$", "ORDERS", "UNIQUE", "LOB"),
            ],
        )
        .on(
            "from all_ind_columns",
            vec![key_column_row("INDEX_NAME", "IX_ORDERS_CUSTOMER", "ORDERS", "CUSTOMER_ID")],
        )
}

fn column_row(
    table: &str,
    column: &str,
    data_type: &str,
    precision: Option<u32>,
    nullable: &str,
    default: Option<&str>,
) -> Row {
    let mut row = Row::new()
        .with("TABLE_NAME", table)
        .with("COLUMN_NAME", column)
        .with("DATA_TYPE", data_type)
        .with("NULLABLE", nullable)
        .with("DATA_DEFAULT", default.map(Value::from).unwrap_or(Value::Null));
    if let Some(p) = precision {
        row = row.with("DATA_PRECISION", p).with("DATA_SCALE", 0);
    }
    row
}

fn constraint_row(table: &str, name: &str, kind: &str) -> Row {
    Row::new()
        .with("TABLE_NAME", table)
        .with("CONSTRAINT_NAME", name)
        .with("CONSTRAINT_TYPE", kind)
        .with("GENERATED", "USER NAME")
}

fn key_column_row(name_column: &str, name: &str, table: &str, column: &str) -> Row {
    Row::new()
        .with(name_column, name)
        .with("TABLE_NAME", table)
        .with("COLUMN_NAME", column)
}

fn index_row(name: &str, table: &str, uniqueness: &str, index_type: &str) -> Row {
    Row::new()
        .with("INDEX_NAME", name)
        .with("TABLE_NAME", table)
        .with("UNIQUENESS", uniqueness)
        .with("INDEX_TYPE", index_type)
}
