//! Database connection handling
//!
//! This module opens driver sessions from configuration and adapts the
//! blocking `oracle` crate to the async [`Session`] contract.

use crate::config::DatabaseConfig;
use crate::db::session::Session;
use crate::error::{Error, Result};

/// Oracle error codes that mean the network or the session went away.
/// Reads failing with one of these are worth retrying.
const TRANSIENT_CODES: &[&str] = &[
    "ORA-03113", "ORA-03114", "ORA-03135", "ORA-12170", "ORA-12537", "ORA-12541", "ORA-12547",
    "ORA-25408", "DPI-1010", "DPI-1080",
];

/// Classify a driver error message into the crate taxonomy
pub fn classify_driver_error(message: &str) -> Error {
    if TRANSIENT_CODES.iter().any(|code| message.contains(code)) {
        Error::ConnectionError(message.to_string())
    } else {
        Error::DatabaseError(message.to_string())
    }
}

/// Turn a connect failure into an actionable message
pub fn describe_connect_error(config: &DatabaseConfig, message: &str) -> Error {
    let target = config.connect_string();
    let text = if message.contains("DPI-1047") {
        "Oracle client library could not be loaded; install Oracle Instant Client".to_string()
    } else if message.contains("ORA-01017") {
        format!("Authentication failed for {}@{}", config.username, target)
    } else if message.contains("ORA-12514") {
        format!("Service not known to the listener at {}", target)
    } else if message.contains("ORA-12170") || message.contains("ORA-12541") {
        format!("Could not reach {}: {}", target, message)
    } else {
        format!("Failed to connect to {}: {}", target, message)
    };
    Error::ConnectionError(text)
}

/// Open a session for the given configuration
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn Session>> {
    #[cfg(feature = "oracle")]
    {
        let session = oracle_session::OracleSession::connect(config).await?;
        Ok(Box::new(session))
    }

    #[cfg(not(feature = "oracle"))]
    {
        Err(Error::ConnectionError(format!(
            "cannot connect to {}: built without the `oracle` feature",
            config.connect_string()
        )))
    }
}

#[cfg(feature = "oracle")]
pub use oracle_session::OracleSession;

#[cfg(feature = "oracle")]
mod oracle_session {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use oracle::sql_type::ToSql;
    use serde_json::Value;

    use super::{classify_driver_error, describe_connect_error};
    use crate::config::DatabaseConfig;
    use crate::db::bounded::Interrupt;
    use crate::db::session::{Row, Session};
    use crate::error::{Error, Result};

    /// A single dedicated Oracle connection
    ///
    /// The driver is blocking, so every call runs on tokio's blocking pool,
    /// one at a time. A call whose future is dropped (timeout or
    /// cancellation) is broken off on the server so the next call does not
    /// wait for it.
    pub struct OracleSession {
        conn: Arc<oracle::Connection>,
        in_call: Arc<Mutex<()>>,
    }

    impl OracleSession {
        pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
            let username = config.username.clone();
            let password = config.password.clone().unwrap_or_default();
            let connect_string = config.connect_string();
            let timeout = Duration::from_secs(config.timeout_seconds);

            tracing::info!(dsn = %connect_string, user = %username, "Connecting to Oracle");

            let handle = tokio::task::spawn_blocking(move || {
                oracle::Connection::connect(&username, &password, &connect_string)
            });

            let conn = tokio::time::timeout(timeout, handle)
                .await
                .map_err(|_| {
                    Error::ConnectionError(format!(
                        "timed out after {:?} connecting to {}",
                        timeout,
                        config.connect_string()
                    ))
                })?
                .map_err(|e| Error::ConnectionError(format!("connect task failed: {}", e)))?
                .map_err(|e| describe_connect_error(config, &e.to_string()))?;

            tracing::info!(dsn = %config.connect_string(), "Connected");

            Ok(Self {
                conn: Arc::new(conn),
                in_call: Arc::new(Mutex::new(())),
            })
        }

        async fn with_conn<T, F>(&self, f: F) -> Result<T>
        where
            T: Send + 'static,
            F: FnOnce(&oracle::Connection) -> std::result::Result<T, oracle::Error> + Send + 'static,
        {
            let interrupt = Interrupt::new({
                let conn = Arc::clone(&self.conn);
                move || {
                    tracing::warn!("Driver call abandoned, breaking execution");
                    if let Err(e) = conn.break_execution() {
                        tracing::warn!(error = %e, "Could not break execution");
                    }
                }
            });

            let conn = Arc::clone(&self.conn);
            let in_call = Arc::clone(&self.in_call);
            let result = tokio::task::spawn_blocking(move || {
                let _serial = in_call
                    .lock()
                    .map_err(|_| Error::DatabaseError("session lock poisoned".to_string()))?;
                f(&conn).map_err(|e| classify_driver_error(&e.to_string()))
            })
            .await
            .map_err(|e| Error::DatabaseError(format!("driver task failed: {}", e)));

            interrupt.disarm();
            result?
        }
    }

    /// Owned bind values; the driver wants `&dyn ToSql`
    fn bind_values(params: &[Value]) -> Vec<Box<dyn ToSql>> {
        params
            .iter()
            .map(|value| -> Box<dyn ToSql> {
                match value {
                    Value::Null => Box::new(None::<String>),
                    Value::Bool(b) => Box::new(i64::from(*b)),
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => Box::new(i),
                        None => Box::new(n.as_f64().unwrap_or_default()),
                    },
                    Value::String(s) => Box::new(s.clone()),
                    other => Box::new(other.to_string()),
                }
            })
            .collect()
    }

    #[async_trait]
    impl Session for OracleSession {
        async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
            let sql = sql.to_string();
            let params = params.to_vec();
            tracing::debug!(sql = %sql, "execute");
            self.with_conn(move |conn| {
                let binds = bind_values(&params);
                let refs: Vec<&dyn ToSql> = binds.iter().map(|b| b.as_ref()).collect();
                let stmt = conn.execute(&sql, &refs)?;
                stmt.row_count()
            })
            .await
        }

        async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            let sql = sql.to_string();
            let params = params.to_vec();
            tracing::debug!(sql = %sql, "query");
            self.with_conn(move |conn| {
                let binds = bind_values(&params);
                let refs: Vec<&dyn ToSql> = binds.iter().map(|b| b.as_ref()).collect();
                let result_set = conn.query(&sql, &refs)?;
                let names: Vec<String> = result_set
                    .column_info()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();

                let mut rows = Vec::new();
                for row_result in result_set {
                    let row = row_result?;
                    let mut out = Row::new();
                    for (idx, name) in names.iter().enumerate() {
                        let value: Option<String> = row.get(idx)?;
                        out.insert(name, value.map(Value::String).unwrap_or(Value::Null));
                    }
                    rows.push(out);
                }
                Ok(rows)
            })
            .await
        }

        async fn commit(&self) -> Result<()> {
            self.with_conn(|conn| conn.commit()).await
        }

        async fn rollback(&self) -> Result<()> {
            self.with_conn(|conn| conn.rollback()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_sessions_are_transient() {
        assert!(classify_driver_error("ORA-03113: end-of-file on communication channel")
            .is_transient());
        assert!(!classify_driver_error("ORA-00942: table or view does not exist").is_transient());
    }

    #[test]
    fn connect_errors_name_the_target() {
        let config: DatabaseConfig = toml::from_str(
            r#"
            host = "db"
            service_name = "PDB1"
            username = "scott"
            "#,
        )
        .unwrap();
        let err = describe_connect_error(&config, "ORA-01017: invalid username/password");
        assert!(err.to_string().contains("scott@db:1521/PDB1"));
    }
}
