//! Fixed-delay retry for flaky network-backed tools.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::METRICS;

/// Retry an operation up to `attempts` times in total, sleeping `delay_secs`
/// between failures.
///
/// Opt-in per backend: only connectors fronting network services carry one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub attempts: u32,
    /// Seconds to wait after a failed attempt.
    #[serde(default)]
    pub delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay_secs: delay.as_secs(),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// The error of the final attempt is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= max_attempts => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_secs = self.delay_secs,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    METRICS.inc_retries();
                    tokio::time::sleep(self.delay()).await;
                    attempt += 1;
                }
            }
        }
    }
}
