//! Retry with exponential backoff.
//!
//! Used around inference requests and database writes. Only failures a retry
//! could plausibly fix are retried; everything else returns on the first
//! attempt.
//!
//! ```rust,ignore
//! use workbench_core::retry::{RetryPolicy, with_retry};
//!
//! let policy = RetryPolicy::inference();
//! let outcome = with_retry(&policy, || async { embedder.embed(&incidents).await }).await;
//! let embedded = outcome.result?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, Result, StorageError};

/// Exponential backoff with proportional jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait before the second attempt
    pub initial_delay: Duration,
    /// Ceiling for any single wait
    pub max_delay: Duration,
    /// Growth per retry, at least 1.0
    pub backoff_factor: f64,
    /// Fraction of the wait drawn uniformly in `[-j, +j]`
    pub jitter_percent: f64,
    /// Attempt budget including the first call; `None` retries until success
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(100),
            Duration::from_secs(30),
            2.0,
            0.1,
            Some(3),
        )
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_percent: f64,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_factor: backoff_factor.max(1.0),
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
            max_attempts,
        }
    }

    /// Embedding and generation calls: one retry after ~500ms.
    #[must_use]
    pub fn inference() -> Self {
        Self::new(
            Duration::from_millis(500),
            Duration::from_secs(10),
            2.0,
            0.1,
            Some(2),
        )
    }

    /// SQLite writes contending on a busy database: short, frequent retries.
    #[must_use]
    pub fn db_write() -> Self {
        Self::new(
            Duration::from_millis(50),
            Duration::from_secs(2),
            2.0,
            0.1,
            Some(5),
        )
    }

    /// Same policy with a different attempt budget (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Wait before retry number `retry` (0 = the wait after the first failure).
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let growth = self.backoff_factor.powi(retry.min(31) as i32);
        let capped = (self.initial_delay.as_secs_f64() * growth).min(self.max_delay.as_secs_f64());
        let spread = capped * self.jitter_percent;
        let offset = if spread > 0.0 {
            rand::rng().random_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + offset).max(0.0))
    }

    fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

/// Final result plus how much retrying it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E = Error> {
    pub result: std::result::Result<T, E>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Whether a retry could plausibly fix `error`.
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::ServiceUnavailable(e) => e.is_transient(),
        Error::Storage(StorageError::Database(e)) => matches!(
            e.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        ),
        Error::Io(_) => true,
        Error::Configuration(_)
        | Error::InsufficientData { .. }
        | Error::SchemaMismatch(_)
        | Error::InvalidInput(_)
        | Error::Storage(_)
        | Error::Config(_)
        | Error::Json(_)
        | Error::Runtime(_) => false,
    }
}

/// Retry a workbench operation while [`is_retryable`] holds.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(policy, is_retryable, operation).await.result
}

/// Retry any fallible async operation while `should_retry` holds and the
/// policy's attempt budget lasts.
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    let result = loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => break Ok(value),
            Err(err) => err,
        };
        if !should_retry(&err) {
            break Err(err);
        }
        if !policy.allows(attempts) {
            warn!(attempts, error = %err, "Giving up after retry budget");
            break Err(err);
        }
        let delay = policy.delay_for_attempt(attempts - 1);
        debug!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    };
    if result.is_ok() && attempts > 1 {
        debug!(attempts, "Recovered after retry");
    }
    RetryOutcome {
        result,
        attempts,
        elapsed: started.elapsed(),
    }
}
