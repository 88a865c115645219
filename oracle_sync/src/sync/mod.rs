//! Applying changes to a target database
//!
//! The [`Synchronizer`] turns a schema or data delta into statements and runs
//! them against the target session in batches, one transaction per batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::data::diff::{DataDiffer, Record};
use crate::db::executor::{execute_in_transaction, BatchOutcome};
use crate::db::session::Session;
use crate::error::{Error, Result};
use crate::schema::diff::SchemaDiffer;
use crate::schema::generator::{DdlGenerator, Statement, StatementKind};
use crate::schema::types::{ColumnMetadata, SchemaSnapshot};

/// Synchronization settings
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Report statements without executing them
    pub dry_run: bool,
    /// Abort the run at the first failed statement
    pub stop_on_error: bool,
    /// Statements per transaction
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            stop_on_error: true,
            batch_size: 1,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            stop_on_error: config.stop_on_error,
            batch_size: config.batch_size,
        }
    }
}

/// What happened to one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Dry run; not executed
    Planned,
    Committed,
    /// Executed, then undone when a later statement in its batch failed
    RolledBack,
    Failed,
    /// Not attempted because the run stopped
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementOutcome {
    pub statement: Statement,
    pub status: OutcomeStatus,
    pub error: Option<String>,
}

/// Record of one synchronization run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub source_fingerprint: Option<String>,
    pub target_fingerprint: Option<String>,
    pub outcomes: Vec<StatementOutcome>,
}

impl SyncReport {
    fn start(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            source_fingerprint: None,
            target_fingerprint: None,
            outcomes: Vec::new(),
        }
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.outcomes.iter().map(|o| &o.statement)
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StatementOutcome> {
        self.outcomes.iter().filter(|o| o.status == OutcomeStatus::Failed)
    }

    /// True when nothing failed
    pub fn succeeded(&self) -> bool {
        self.count(OutcomeStatus::Failed) == 0
    }

    fn record(&mut self, statement: &Statement, status: OutcomeStatus, error: Option<String>) {
        self.outcomes.push(StatementOutcome {
            statement: statement.clone(),
            status,
            error,
        });
    }
}

/// Applies deltas to the target session
///
/// Holds the session exclusively for the lifetime of the run.
pub struct Synchronizer<'a> {
    session: &'a mut dyn Session,
    generator: DdlGenerator,
    options: SyncOptions,
}

impl<'a> Synchronizer<'a> {
    pub fn new(session: &'a mut dyn Session, generator: DdlGenerator, options: SyncOptions) -> Self {
        Self {
            session,
            generator,
            options,
        }
    }

    /// Bring the target from `current` to `desired`
    pub async fn synchronize(
        &mut self,
        desired: &SchemaSnapshot,
        current: &SchemaSnapshot,
    ) -> Result<SyncReport> {
        let delta = SchemaDiffer::diff(current, desired)?;
        let (added, removed, modified) = delta.counts();
        tracing::info!(added, removed, modified, "Schema delta computed");

        let statements = self.generator.generate(&delta)?;
        let mut report = SyncReport::start(self.options.dry_run);
        report.source_fingerprint = Some(desired.fingerprint());
        report.target_fingerprint = Some(current.fingerprint());
        self.run(report, &statements).await
    }

    /// Bring the target rows of `table` from `current` to `desired`
    ///
    /// `columns` are the target's column types, used to write values back.
    pub async fn synchronize_data<K: AsRef<str>>(
        &mut self,
        table: &str,
        columns: &[ColumnMetadata],
        desired: &[Record],
        current: &[Record],
        key_columns: &[K],
    ) -> Result<SyncReport> {
        let delta = DataDiffer::diff(current, desired, key_columns)?;
        let statements = self.generator.generate_data(table, columns, &delta)?;
        self.run(SyncReport::start(self.options.dry_run), &statements).await
    }

    /// Execute prepared statements
    pub async fn apply(&mut self, statements: &[Statement]) -> Result<SyncReport> {
        self.run(SyncReport::start(self.options.dry_run), statements).await
    }

    async fn run(&mut self, mut report: SyncReport, statements: &[Statement]) -> Result<SyncReport> {
        tracing::info!(
            run_id = %report.run_id,
            statements = statements.len(),
            dry_run = self.options.dry_run,
            "Starting synchronization"
        );

        if self.options.dry_run {
            for statement in statements {
                report.record(statement, OutcomeStatus::Planned, None);
            }
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        let batch_size = self.options.batch_size.max(1);
        let mut position = 0;

        while position < statements.len() {
            let end = (position + batch_size).min(statements.len());
            let batch = &statements[position..end];

            match execute_in_transaction(&*self.session, batch).await {
                BatchOutcome::Committed => {
                    for statement in batch {
                        report.record(statement, OutcomeStatus::Committed, None);
                    }
                    position = end;
                }
                BatchOutcome::Failed { index, error } => {
                    // Oracle commits implicitly around DDL, taking any DML
                    // executed before it along
                    let committed = batch[..index]
                        .iter()
                        .rposition(|s| s.kind == StatementKind::Ddl)
                        .map_or(0, |last_ddl| last_ddl + 1);
                    for (offset, statement) in batch[..index].iter().enumerate() {
                        let status = if offset < committed {
                            OutcomeStatus::Committed
                        } else {
                            OutcomeStatus::RolledBack
                        };
                        report.record(statement, status, None);
                    }

                    let failed = &batch[index];
                    let message = error.to_string();
                    tracing::error!(
                        run_id = %report.run_id,
                        table = %failed.table,
                        sql = %failed.sql,
                        error = %message,
                        "Statement failed"
                    );
                    report.record(failed, OutcomeStatus::Failed, Some(message.clone()));

                    if self.options.stop_on_error {
                        for statement in &statements[position + index + 1..] {
                            report.record(statement, OutcomeStatus::Skipped, None);
                        }
                        report.finished_at = Some(Utc::now());
                        return Err(Error::ApplyError {
                            statement: failed.sql.clone(),
                            table: failed.table.clone(),
                            message,
                            report: Box::new(report),
                        });
                    }

                    position += index + 1;
                }
            }
        }

        report.finished_at = Some(Utc::now());
        tracing::info!(
            run_id = %report.run_id,
            committed = report.count(OutcomeStatus::Committed),
            failed = report.count(OutcomeStatus::Failed),
            "Synchronization finished"
        );
        Ok(report)
    }
}
