//! Exponential backoff for blocking operations.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::settings::DownloadSettings;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(download: &DownloadSettings) -> Self {
        Self {
            max_attempts: download.max_attempts.max(1),
            initial_delay: Duration::from_millis(download.backoff_ms),
            ..Self::default()
        }
    }

    /// Delay after the failed attempt number `attempt` (zero based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }

    /// Runs `operation` until it succeeds or the attempts run out. Returns the
    /// attempt count alongside the outcome.
    pub fn run<T, E, F>(&self, operation_name: &str, operation: F) -> (u32, Result<T, E>)
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        self.run_while(operation_name, operation, |_| true)
    }

    /// Like [`RetryPolicy::run`], but stops at the first error `retryable`
    /// rejects.
    pub fn run_while<T, E, F, R>(
        &self,
        operation_name: &str,
        mut operation: F,
        retryable: R,
    ) -> (u32, Result<T, E>)
    where
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "succeeded after retry");
                    }
                    return (attempt, Ok(value));
                }
                Err(err) if attempt < max_attempts && retryable(&err) => {
                    let delay = self.delay_for_attempt(attempt - 1);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %err,
                        "failed, retrying in {delay:?}"
                    );
                    thread::sleep(delay);
                }
                Err(err) => return (attempt, Err(err)),
            }
        }
    }
}
