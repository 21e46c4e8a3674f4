// Retry with Fibonacci backoff
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::application::constants::{BACKOFF_UNIT, DEFAULT_BACKOFF_BUDGET};

/// Backoff budget and step size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Cumulative wait after which retrying stops
    pub budget: Duration,
    /// Length of one Fibonacci step
    pub unit: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BACKOFF_BUDGET,
            unit: BACKOFF_UNIT,
        }
    }
}

impl BackoffConfig {
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }
}

/// Result of a retried call
#[derive(Debug, PartialEq, Eq)]
pub enum BackoffOutcome<T> {
    Success(T),
    /// Budget exhausted; carries the last error's message
    Exhausted(String),
}

impl<T> BackoffOutcome<T> {
    /// `0` on success, `-1` once the budget is exhausted
    pub fn status(&self) -> i32 {
        match self {
            BackoffOutcome::Success(_) => 0,
            BackoffOutcome::Exhausted(_) => -1,
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            BackoffOutcome::Success(v) => Ok(v),
            BackoffOutcome::Exhausted(msg) => Err(msg),
        }
    }
}

/// Retries any fallible async call with delays of 1, 1, 2, 3, 5, 8, ...
/// units until it succeeds or the cumulative wait exceeds the budget.
///
/// Knows nothing about what the call does; used the same way for every
/// submission backend.
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    config: BackoffConfig,
}

impl RetryScheduler {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub async fn attempt<T, E, F, Fut>(&self, mut call: F) -> BackoffOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut elapsed = Duration::ZERO;
        let (mut current, mut next) = (1u32, 1u32);
        let mut attempt = 1u32;

        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Call succeeded after retry");
                    }
                    return BackoffOutcome::Success(value);
                }
                Err(e) => {
                    if elapsed > self.config.budget {
                        warn!(
                            attempt,
                            elapsed_ms = elapsed.as_millis() as u64,
                            error = %e,
                            "Backoff budget exhausted"
                        );
                        return BackoffOutcome::Exhausted(e.to_string());
                    }

                    let delay = self.config.unit.saturating_mul(current);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;

                    elapsed += delay;
                    (current, next) = (next, current.saturating_add(next));
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn scheduler(budget_units: u32) -> RetryScheduler {
        let unit = Duration::from_millis(1);
        RetryScheduler::new(BackoffConfig {
            budget: unit * budget_units,
            unit,
        })
    }

    #[tokio::test]
    async fn test_always_failing_call_is_bounded() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let outcome: BackoffOutcome<()> = scheduler(25)
            .attempt(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("queue unavailable") }
            })
            .await;

        assert_eq!(outcome.status(), -1);
        assert_eq!(outcome, BackoffOutcome::Exhausted("queue unavailable".into()));
        // 1+1+2+3+5+8+13 = 33 > 25: seven sleeps, eight calls
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let calls = AtomicU32::new(0);

        let outcome = scheduler(60)
            .attempt(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format!("busy ({n})"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(outcome.status(), 0);
        assert_eq!(outcome.into_result(), Ok(2));
    }

    #[tokio::test]
    async fn test_zero_budget_still_retries_once() {
        let calls = AtomicU32::new(0);
        let outcome: BackoffOutcome<()> = scheduler(0)
            .attempt(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("no") }
            })
            .await;

        assert_eq!(outcome.status(), -1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
