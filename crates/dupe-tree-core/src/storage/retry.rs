use crate::config::AppConfig;
use crate::error::Error;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Bounded retry for busy/locked storage. Logic errors are returned on the first failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            attempts: config.storage_retry_attempts.max(1),
            backoff: Duration::from_millis(config.storage_retry_backoff_ms),
        }
    }

    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    let wait = self.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "{} hit transient storage error (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, self.attempts, err, wait
                    );
                    thread::sleep(wait);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
