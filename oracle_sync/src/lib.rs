//! oracle_sync: schema and data comparison and synchronization for Oracle
//!
//! oracle_sync reads live schema metadata into immutable snapshots, computes
//! structural and row-level deltas between two sides, renders them as
//! ordered Oracle DDL and DML, and applies the statements to a target with
//! dry-run, stop-on-error and batching.

pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod schema;
pub mod sql;
pub mod sync;
pub mod utils;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

// Re-export main types for easier access
pub use config::Config;
pub use data::{DataDelta, DataDiffer, Record};
pub use db::{Row, Session};
pub use error::{Error, Result};
pub use schema::{
    DdlGenerator, GeneratorOptions, SchemaDelta, SchemaDiffer, SchemaIntrospector, SchemaSnapshot,
    Statement,
};
pub use sql::{ParsedStatement, SqlStatementParser, StatementType};
pub use sync::{OutcomeStatus, SyncOptions, SyncReport, Synchronizer};

use config::DatabaseConfig;
use schema::IntrospectionOptions;

/// Load the configuration file and connect to both sides
pub async fn init(config_path: &str) -> Result<OracleSyncClient> {
    let config = config::load_from_file(config_path)?;
    OracleSyncClient::connect(config).await
}

/// The main client: one source session, an optional target session, and
/// the configuration that drives introspection, generation and sync
pub struct OracleSyncClient {
    config: Config,
    source: Box<dyn Session>,
    target: Option<Box<dyn Session>>,
    cancel: CancellationToken,
}

impl OracleSyncClient {
    /// Open sessions for the configured source and target
    pub async fn connect(config: Config) -> Result<Self> {
        let source = db::connect(&config.source).await?;
        let target = match &config.target {
            Some(target) => Some(db::connect(target).await?),
            None => None,
        };
        Ok(Self::with_sessions(config, source, target))
    }

    /// Build a client around sessions opened elsewhere
    pub fn with_sessions(
        config: Config,
        source: Box<dyn Session>,
        target: Option<Box<dyn Session>>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that aborts in-flight database calls when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.config.introspection.timeout_seconds)
    }

    fn target_session(&self) -> Result<&dyn Session> {
        self.target
            .as_deref()
            .ok_or_else(|| Error::ConfigError("No [target] database configured".to_string()))
    }

    /// Run a trivial query on every configured side
    pub async fn test_connections(&self) -> Result<()> {
        self.ping("source", self.source.as_ref(), &self.config.source).await?;
        if let Some(target) = &self.config.target {
            self.ping("target", self.target_session()?, target).await?;
        }
        Ok(())
    }

    async fn ping(&self, side: &str, session: &dyn Session, config: &DatabaseConfig) -> Result<()> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        db::bounded(side, timeout, &self.cancel, session.fetch_one("SELECT 1 FROM dual", &[])).await?;
        tracing::info!(side, dsn = %config.connect_string(), "Connection OK");
        Ok(())
    }

    async fn introspect(&self, session: &dyn Session, config: &DatabaseConfig) -> Result<SchemaSnapshot> {
        SchemaIntrospector::new(session, IntrospectionOptions::from(&self.config.introspection))
            .with_cancellation(self.cancel.clone())
            .introspect(&config.owner())
            .await
    }

    /// Snapshot the source schema
    pub async fn snapshot_source(&self) -> Result<SchemaSnapshot> {
        self.introspect(self.source.as_ref(), &self.config.source).await
    }

    /// Snapshot the target schema
    pub async fn snapshot_target(&self) -> Result<SchemaSnapshot> {
        self.introspect(self.target_session()?, self.config.target()?).await
    }

    /// The changes that turn the source schema into the target schema
    pub async fn diff(&self) -> Result<SchemaDelta> {
        let source = self.snapshot_source().await?;
        let target = self.snapshot_target().await?;
        SchemaDiffer::diff(&source, &target)
    }

    fn generator(&self) -> Result<DdlGenerator> {
        let mut options = GeneratorOptions::from(&self.config.sync);
        // Qualify names only when the target owner differs from the login
        options.owner = self.config.target()?.schema.as_ref().map(|s| s.to_uppercase());
        Ok(DdlGenerator::new(options))
    }

    /// Statements that would bring the target schema in line with the source
    pub async fn plan(&self) -> Result<Vec<Statement>> {
        let desired = self.snapshot_source().await?;
        let current = self.snapshot_target().await?;
        let delta = SchemaDiffer::diff(&current, &desired)?;
        self.generator()?.generate(&delta)
    }

    /// Bring the target schema in line with the source
    pub async fn sync(&mut self, options: SyncOptions) -> Result<SyncReport> {
        let desired = self.snapshot_source().await?;
        let current = self.snapshot_target().await?;
        let generator = self.generator()?;

        let session = self
            .target
            .as_deref_mut()
            .ok_or_else(|| Error::ConfigError("No [target] database configured".to_string()))?;
        Synchronizer::new(session, generator, options)
            .synchronize(&desired, &current)
            .await
    }

    /// Key columns for a data comparison: the given ones, else the source
    /// table's primary key
    async fn key_columns(&self, table: &str, keys: &[String]) -> Result<Vec<String>> {
        if !keys.is_empty() {
            return Ok(keys.to_vec());
        }
        let keys = db::bounded(
            "primary key lookup",
            self.query_timeout(),
            &self.cancel,
            data::primary_key_columns(self.source.as_ref(), &self.config.source.owner(), table),
        )
        .await?;
        if keys.is_empty() {
            return Err(Error::ValidationError(format!(
                "table {} has no primary key; name the key columns explicitly",
                table
            )));
        }
        Ok(keys)
    }

    async fn rows(
        &self,
        session: &dyn Session,
        config: &DatabaseConfig,
        table: &str,
        columns: &[String],
        where_clause: Option<&str>,
    ) -> Result<Vec<Record>> {
        let owner = config.owner();
        db::bounded(
            "row fetch",
            self.query_timeout(),
            &self.cancel,
            data::fetch_rows(session, &owner, table, columns, where_clause),
        )
        .await
    }

    /// Compare the rows of one table on both sides
    pub async fn data_diff(
        &self,
        table: &str,
        keys: &[String],
        columns: &[String],
        where_clause: Option<&str>,
    ) -> Result<DataDelta> {
        let keys = self.key_columns(table, keys).await?;
        let source = self
            .rows(self.source.as_ref(), &self.config.source, table, columns, where_clause)
            .await?;
        let target = self
            .rows(self.target_session()?, self.config.target()?, table, columns, where_clause)
            .await?;
        DataDiffer::diff(&source, &target, &keys)
    }

    /// Bring the target rows of one table in line with the source
    pub async fn sync_data(
        &mut self,
        table: &str,
        keys: &[String],
        where_clause: Option<&str>,
        options: SyncOptions,
    ) -> Result<SyncReport> {
        let keys = self.key_columns(table, keys).await?;
        let desired = self
            .rows(self.source.as_ref(), &self.config.source, table, &[], where_clause)
            .await?;
        let current = self
            .rows(self.target_session()?, self.config.target()?, table, &[], where_clause)
            .await?;
        let columns = db::bounded(
            "column lookup",
            self.query_timeout(),
            &self.cancel,
            data::table_columns(self.target_session()?, &self.config.target()?.owner(), table),
        )
        .await?;
        let generator = self.generator()?;

        let session = self
            .target
            .as_deref_mut()
            .ok_or_else(|| Error::ConfigError("No [target] database configured".to_string()))?;
        Synchronizer::new(session, generator, options)
            .synchronize_data(table, &columns, &desired, &current, &keys)
            .await
    }
}
