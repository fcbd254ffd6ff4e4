//! Bounded retry with jittered exponential backoff.
//!
//! Every external call made by the registry service and the state coordinator goes
//! through [`RetryPolicy::run`], which applies the per-attempt timeout, honours the
//! caller's cancellation token and retries only transient failures.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use switchyard_core::{CallOptions, Result, SwitchyardError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backend: &'static str,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        backend: &'static str,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            timeout,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Backoff before attempt `attempt + 1`: `base * 2^(attempt-1)` capped at
    /// `max_delay`, then jittered into its upper half.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let ceiling = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms == 0 {
            return ceiling;
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    /// Runs `call` until it succeeds, fails permanently or attempts run out.
    ///
    /// A timed-out attempt counts as a transient failure. Cancellation through
    /// `options.cancel` returns [`SwitchyardError::Cancelled`] at the next
    /// suspension point.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        options: &CallOptions,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<SwitchyardError>,
    {
        let timeout = options.timeout_or(self.timeout);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if options.is_cancelled() {
                return Err(SwitchyardError::Cancelled);
            }

            let outcome =
                cancellable(options.cancel.as_ref(), tokio::time::timeout(timeout, call())).await?;

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e.into(),
                Err(_) => SwitchyardError::transient(
                    self.backend,
                    format!("{} timed out after {:?}", operation, timeout),
                ),
            };

            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                debug!(backend = self.backend, operation, attempt, "Retries exhausted");
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                backend = self.backend,
                operation,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            cancellable(options.cancel.as_ref(), tokio::time::sleep(delay)).await?;
        }
    }
}

async fn cancellable<F: Future>(token: Option<&CancellationToken>, future: F) -> Result<F::Output> {
    match token {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(SwitchyardError::Cancelled),
            output = future => Ok(output),
        },
        None => Ok(future.await),
    }
}
