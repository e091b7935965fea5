//! Bulk Label Applier
//!
//! Adds or removes labels on many messages through the batch scheduler, with a
//! retry policy around every single-message call and optional verification.

use std::sync::Arc;

use lib_email_clients::gmail::message::MessageFormat;

use crate::app_config::ApplyConfig;
use crate::email::provider::{LabelChange, MailboxProvider};

use super::scheduler::{BatchScheduler, RetryPolicy};
use super::types::{BatchOutcome, BulkSummary, VerificationWarning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LabelOperation {
    Add,
    Remove,
}

impl LabelOperation {
    fn change(&self, label_ids: Vec<String>) -> LabelChange {
        match self {
            LabelOperation::Add => LabelChange::add(label_ids),
            LabelOperation::Remove => LabelChange::remove(label_ids),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRequest {
    pub message_id: String,
    pub label_ids: Vec<String>,
}

impl LabelRequest {
    pub fn new(message_id: &str, label_ids: Vec<String>) -> Self {
        Self {
            message_id: message_id.to_string(),
            label_ids,
        }
    }
}

pub struct BulkLabelApplier {
    provider: Arc<dyn MailboxProvider>,
    scheduler: BatchScheduler,
    retry: RetryPolicy,
    verify: bool,
}

fn dedup_labels(label_ids: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(label_ids.len());
    for id in label_ids {
        if !seen.contains(id) {
            seen.push(id.clone());
        }
    }
    seen
}

impl BulkLabelApplier {
    pub fn new(
        provider: Arc<dyn MailboxProvider>,
        scheduler: BatchScheduler,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            scheduler,
            retry,
            verify: false,
        }
    }

    /// `deadline_secs` counts from `run_started`, not from construction.
    pub fn from_config(
        provider: Arc<dyn MailboxProvider>,
        config: &ApplyConfig,
        run_started: tokio::time::Instant,
    ) -> Self {
        let deadline = config
            .deadline_secs
            .map(|secs| run_started + tokio::time::Duration::from_secs(secs));
        let scheduler = BatchScheduler::new(
            config.batch_size,
            tokio::time::Duration::from_millis(config.batch_delay_ms),
        )
        .with_deadline(deadline);

        Self::new(provider, scheduler, RetryPolicy::from_config(config))
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub async fn apply_labels(&self, message_id: &str, label_ids: &[String]) -> BatchOutcome {
        self.execute(LabelOperation::Add, message_id, label_ids).await.0
    }

    pub async fn remove_labels(&self, message_id: &str, label_ids: &[String]) -> BatchOutcome {
        self.execute(LabelOperation::Remove, message_id, label_ids)
            .await
            .0
    }

    pub async fn bulk_apply(&self, requests: Vec<LabelRequest>) -> BulkSummary {
        self.bulk(LabelOperation::Add, requests).await
    }

    pub async fn bulk_remove(&self, requests: Vec<LabelRequest>) -> BulkSummary {
        self.bulk(LabelOperation::Remove, requests).await
    }

    async fn bulk(&self, operation: LabelOperation, requests: Vec<LabelRequest>) -> BulkSummary {
        if requests.is_empty() {
            return BulkSummary::default();
        }
        tracing::info!(
            "Bulk {operation}: {} messages in batches of {}",
            requests.len(),
            self.scheduler.batch_size()
        );

        let results = self
            .scheduler
            .run(
                requests,
                |request| async move {
                    self.execute(operation, &request.message_id, &request.label_ids)
                        .await
                },
                |request| {
                    let outcome = BatchOutcome::failed(
                        &request.message_id,
                        "Deadline reached before dispatch",
                        0,
                    );
                    (outcome, None)
                },
            )
            .await;

        let mut summary = BulkSummary::default();
        for (outcome, warning) in results {
            summary.outcomes.push(outcome);
            summary.verification_warnings.extend(warning);
        }

        tracing::info!(
            "Bulk {operation} finished: {} succeeded, {} failed, {} verification warnings",
            summary.successful(),
            summary.failed(),
            summary.verification_warnings.len()
        );
        summary
    }

    async fn execute(
        &self,
        operation: LabelOperation,
        message_id: &str,
        label_ids: &[String],
    ) -> (BatchOutcome, Option<VerificationWarning>) {
        let label_ids = dedup_labels(label_ids);
        if label_ids.is_empty() {
            return (BatchOutcome::succeeded(message_id, Vec::new(), 0), None);
        }

        let change = operation.change(label_ids.clone());
        let attempted = self
            .retry
            .run(|_| self.provider.modify_message_labels(message_id, &change))
            .await;

        let mut outcome = match attempted.result {
            Ok(()) => BatchOutcome::succeeded(message_id, label_ids.clone(), attempted.attempts),
            Err(e) => {
                tracing::error!(
                    "Failed to {operation} labels on {message_id} after {} attempt(s): {e}",
                    attempted.attempts
                );
                return (
                    BatchOutcome::failed(message_id, e.to_string(), attempted.attempts),
                    None,
                );
            }
        };

        if !self.verify {
            return (outcome, None);
        }

        let warning = self.verify_labels(operation, message_id, &label_ids).await;
        outcome.verified = Some(warning.is_none());
        (outcome, warning)
    }

    /// Re-fetch the message and check the labels ended up in the expected state.
    async fn verify_labels(
        &self,
        operation: LabelOperation,
        message_id: &str,
        label_ids: &[String],
    ) -> Option<VerificationWarning> {
        let message = match self
            .provider
            .get_message(message_id, MessageFormat::Minimal)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Could not verify labels on {message_id}: {e}");
                return Some(VerificationWarning {
                    message_id: message_id.to_string(),
                    mismatched_labels: label_ids.to_vec(),
                    detail: format!("Verification fetch failed: {e}"),
                });
            }
        };

        let mismatched = label_ids
            .iter()
            .filter(|id| {
                let present = message.label_ids.contains(*id);
                match operation {
                    LabelOperation::Add => !present,
                    LabelOperation::Remove => present,
                }
            })
            .cloned()
            .collect::<Vec<_>>();

        if mismatched.is_empty() {
            return None;
        }

        tracing::warn!(
            "Verification mismatch on {message_id} after {operation}: {:?}",
            mismatched
        );
        let detail = match operation {
            LabelOperation::Add => "Labels missing after add",
            LabelOperation::Remove => "Labels still present after remove",
        };
        Some(VerificationWarning {
            message_id: message_id.to_string(),
            mismatched_labels: mismatched,
            detail: detail.to_string(),
        })
    }
}
