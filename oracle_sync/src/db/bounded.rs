//! Timeout, cancellation and retry around database calls

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run `fut` until it finishes, the timeout elapses or `cancel` fires
pub async fn bounded<T, F>(
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled(operation.to_string())),
        outcome = tokio::time::timeout(timeout, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                elapsed: timeout,
            }),
        },
    }
}

/// Runs a callback when dropped before being disarmed
///
/// Held across a blocking driver call so that a caller abandoning the call
/// (timeout or cancellation drops its future) also interrupts it, instead of
/// leaving it to run on and hold the connection.
pub struct Interrupt<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> Interrupt<F> {
    pub fn new(on_drop: F) -> Self {
        Self {
            on_drop: Some(on_drop),
        }
    }

    /// The call finished; nothing to interrupt
    pub fn disarm(mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce()> Drop for Interrupt<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// Bounded retry for read-only calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with up to 50% jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
        let jitter = if exp > 1 {
            rand::thread_rng().gen_range(0..=exp / 2)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }

    /// Retry `op` while it fails with a transient error
    ///
    /// Each attempt is individually bounded by `timeout` and `cancel`;
    /// cancellation is never retried.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match bounded(operation, timeout, cancel, op()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled(operation.to_string())),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
