//! SQL executor
//!
//! Runs a batch of generated statements as one transaction.

use crate::db::session::Session;
use crate::error::Error;
use crate::schema::generator::Statement;

/// How a batch ended
#[derive(Debug)]
pub enum BatchOutcome {
    /// Every statement ran and the transaction was committed
    Committed,
    /// The statement at `index` failed (or the commit did, reported against
    /// the last statement); the transaction was rolled back
    Failed { index: usize, error: Error },
}

/// Execute statements in order, commit on success, roll back on failure
pub async fn execute_in_transaction(session: &dyn Session, statements: &[Statement]) -> BatchOutcome {
    for (index, statement) in statements.iter().enumerate() {
        tracing::debug!(table = %statement.table, sql = %statement.sql, "Executing statement");
        if let Err(error) = session.execute(&statement.sql, &[]).await {
            rollback(session).await;
            return BatchOutcome::Failed { index, error };
        }
    }

    match session.commit().await {
        Ok(()) => BatchOutcome::Committed,
        Err(error) => {
            rollback(session).await;
            BatchOutcome::Failed {
                index: statements.len().saturating_sub(1),
                error,
            }
        }
    }
}

async fn rollback(session: &dyn Session) {
    if let Err(e) = session.rollback().await {
        tracing::error!(error = %e, "Rollback failed");
    }
}
