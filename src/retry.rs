//! Bounded whole-operation retry.
//!
//! [`RetryPolicy`] runs a fallible async operation up to `max_attempts`
//! times with a fixed delay between attempts. Every failed attempt is
//! handed to the [`ErrorReporter`]. Errors tagged fatal (see
//! [`crate::error`]) stop the loop at once. When the policy gives up it
//! returns a [`RetryError`] instead of pretending nothing happened.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::is_fatal;
use crate::report::ErrorReporter;

/// Terminal outcome of a retried operation that never succeeded.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("fatal error on attempt {attempt}, not retried: {error:#}")]
    Fatal { attempt: u32, error: anyhow::Error },
    #[error("gave up after {attempts} attempt(s): {last_error:#}")]
    Exhausted {
        attempts: u32,
        last_error: anyhow::Error,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempt, .. } => *attempt,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The error from the final attempt.
    pub fn last_error(&self) -> &anyhow::Error {
        match self {
            RetryError::Fatal { error, .. } => error,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }
}

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, 2 minutes apart.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(120),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_secs(config.delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Returns the value and the
    /// attempt it succeeded on.
    pub async fn run<T, F, Fut>(
        &self,
        reporter: &dyn ErrorReporter,
        context: &str,
        mut op: F,
    ) -> Result<(T, u32), RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, context, "succeeded after retry");
                    }
                    return Ok((value, attempt));
                }
                Err(err) => {
                    let label = format!("{} (attempt {}/{})", context, attempt, max_attempts);
                    reporter.report(&err, &label).await;

                    if is_fatal(&err) {
                        return Err(RetryError::Fatal {
                            attempt,
                            error: err,
                        });
                    }
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    warn!(
                        attempt,
                        max_attempts,
                        delay_secs = self.delay.as_secs(),
                        context,
                        "attempt failed, retrying after delay"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
