//! Reusable retry policy with escalating per-attempt budgets.
//!
//! The same policy drives download retries (constant budget) and validator
//! timeout escalation (budget multiplied on every retry).

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Upper bound for any single attempt budget.
pub const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// `base · factor^k` budget for attempt `k`, at most `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_attempts: u32,
    /// Sleep between a failed attempt and the next one.
    pub pause: Duration,
}

/// One attempt handed to the retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Zero-based attempt index.
    pub index: u32,
    /// Budget (usually a timeout) for this attempt.
    pub budget: Duration,
}

/// Final result plus the attempt that produced it.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub last: Attempt,
}

impl RetryPolicy {
    pub fn new(base: Duration, factor: f64, max_attempts: u32) -> Self {
        Self {
            base,
            factor,
            max_attempts: max_attempts.max(1),
            pause: Duration::ZERO,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Same escalation, restarted from a different base.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Budget for attempt `k`, saturated at [`MAX_BUDGET`].
    pub fn value_at(&self, k: u32) -> Duration {
        let exponent = i32::try_from(k).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        if secs.is_nan() || secs < 0.0 {
            return self.base.min(MAX_BUDGET);
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BUDGET)
            .min(MAX_BUDGET)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut k = 0;
        loop {
            let attempt = Attempt {
                index: k,
                budget: self.value_at(k),
            };
            let result = op(attempt).await;

            let give_up = match &result {
                Ok(_) => true,
                Err(e) => !e.is_retryable() || k + 1 >= attempts,
            };
            if give_up {
                return RetryOutcome {
                    result,
                    last: attempt,
                };
            }

            if let Err(e) = &result {
                tracing::warn!(
                    what,
                    attempt = k + 1,
                    of = attempts,
                    error = %e,
                    "attempt failed, retrying"
                );
            }
            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            k += 1;
        }
    }
}
