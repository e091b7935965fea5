use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::time::Duration;

use leaky_bucket::RateLimiter;

use crate::app_config::PromptLimits;

/// Prompt rate limiting for one AI provider, with a shared backoff switch
/// flipped when the provider reports throttling.
#[derive(Clone)]
pub struct RateLimiters {
    prompt: Arc<RateLimiter>,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(
        prompt_limit_per_sec: usize,
        prompt_interval_ms: usize,
        prompt_refill: usize,
    ) -> Self {
        let prompt = RateLimiter::builder()
            .initial(1)
            .interval(Duration::from_millis(prompt_interval_ms.max(1) as u64))
            .max(prompt_limit_per_sec.max(1))
            .refill(prompt_refill.max(1))
            .build();

        Self {
            prompt: Arc::new(prompt),
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration: Duration::from_secs(60),
        }
    }

    pub fn from_limits(limits: &PromptLimits) -> Self {
        Self::new(
            limits.rate_limit_per_sec,
            limits.refill_interval_ms,
            limits.refill_amount,
        )
    }

    pub fn with_backoff_duration(mut self, duration: Duration) -> Self {
        self.backoff_duration = duration;
        self
    }

    pub async fn acquire_one(&self) {
        if self.backoff.load(Relaxed) {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.prompt.acquire_one().await;
    }

    pub fn is_backing_off(&self) -> bool {
        self.backoff.load(Relaxed)
    }

    pub fn trigger_backoff(&self) {
        tracing::info!("Triggering backoff...");
        self.backoff.store(true, Relaxed);
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn get_status(&self) -> String {
        let prompt_bucket = format!("{}/{}", self.prompt.balance(), self.prompt.max());
        if self.backoff.load(Relaxed) {
            format!("prompts: {} (BACKOFF)", prompt_bucket)
        } else {
            format!("prompts: {}", prompt_bucket)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_does_not_block_with_budget() {
        let limiters = RateLimiters::new(10, 100, 10);
        tokio::time::timeout(Duration::from_secs(1), limiters.acquire_one())
            .await
            .expect("first prompt should be admitted immediately");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_expires() {
        let limiters = RateLimiters::new(10, 100, 10).with_backoff_duration(Duration::from_secs(5));
        limiters.trigger_backoff();
        assert!(limiters.is_backing_off());
        assert!(limiters.get_status().contains("BACKOFF"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!limiters.is_backing_off());
    }
}
