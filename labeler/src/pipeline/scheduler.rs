//! Batch Scheduler
//!
//! Splits work into fixed-size batches, runs each batch concurrently and waits
//! a fixed delay between batches. Retrying a single item is the job of
//! [`RetryPolicy`], not the scheduler.

use std::future::Future;

use futures::future::join_all;
use tokio::time::{sleep, Duration, Instant};

use crate::app_config::ApplyConfig;
use crate::error::AppResult;

/// Delay between consecutive batch dispatches.
#[derive(Debug, Clone, Copy)]
pub struct BatchPacer {
    delay: Duration,
}

impl BatchPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Waits before every batch but the first.
    pub async fn pace(&self, batch_index: usize) {
        if batch_index > 0 && !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    batch_size: usize,
    pacer: BatchPacer,
    deadline: Option<Instant>,
}

impl BatchScheduler {
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pacer: BatchPacer::new(delay),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run `worker` over every item, batch by batch, preserving input order.
    /// Items left when the deadline passes are mapped through `undispatched`.
    pub async fn run<I, T, F, Fut, U>(&self, items: Vec<I>, worker: F, undispatched: U) -> Vec<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T>,
        U: Fn(I) -> T,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut remaining = items.into_iter();
        let mut batch_index = 0;

        loop {
            let batch = remaining.by_ref().take(self.batch_size).collect::<Vec<_>>();
            if batch.is_empty() {
                break;
            }

            self.pacer.pace(batch_index).await;
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    "Deadline reached after {} of {} items, skipping the rest",
                    results.len(),
                    total
                );
                results.extend(batch.into_iter().map(&undispatched));
                results.extend(remaining.by_ref().map(&undispatched));
                break;
            }

            tracing::debug!(
                "Dispatching batch {} ({} items)",
                batch_index + 1,
                batch.len()
            );
            results.extend(join_all(batch.into_iter().map(&worker)).await);
            batch_index += 1;
        }

        results
    }
}

/// Exponential backoff for one item: `base * 2^attempt` after failed attempt
/// number `attempt` (1-based), capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

#[derive(Debug)]
pub struct Attempted<T> {
    pub result: AppResult<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &ApplyConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = op(attempt).await;
            match result {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::info!(
                        "Retrying after {:?} (attempt {}/{}): {}",
                        delay,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    return Attempted {
                        result,
                        attempts: attempt,
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ApplyConfig::default())
    }
}
