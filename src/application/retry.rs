//! # Retry Policy
//!
//! `Retrier` re-runs a whole asynchronous stage (an extraction attempt or a
//! file write) after a fixed delay, up to `max_attempts` extra times.
//!
//! The failure counter lives on the `Retrier` rather than inside the call so
//! the scheduler (and tests) can inspect it and reset it after a cooldown.

use crate::domain::entities::RetryConfig;
use crate::domain::errors::Result;
use log::warn;
use std::future::Future;

#[derive(Debug)]
pub struct Retrier {
    stage: &'static str,
    config: RetryConfig,
    failures: u32,
}

impl Retrier {
    pub fn new(stage: &'static str, config: RetryConfig) -> Self {
        Self {
            stage,
            config,
            failures: 0,
        }
    }

    /// Consecutive failures counted since the last success or reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `op` until it succeeds or the failure budget is spent.
    ///
    /// `op` is called again from scratch for every attempt. Once more than
    /// `max_attempts` failures have been counted the last error is returned
    /// unchanged.
    pub async fn run<T, F, Fut>(&mut self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match op().await {
                Ok(value) => {
                    if self.config.reset_on_success {
                        self.failures = 0;
                    }
                    return Ok(value);
                }
                Err(e) => {
                    self.failures = self.failures.saturating_add(1);
                    if self.failures > self.config.max_attempts {
                        return Err(e);
                    }

                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        self.stage,
                        self.failures,
                        self.config.max_attempts,
                        e,
                        self.config.delay
                    );
                    tokio::time::sleep(self.config.delay).await;
                }
            }
        }
    }
}
