//! Pipeline Types
//!
//! Per-message outcomes and the run summary handed back to the caller.

use indexmap::IndexMap;
use serde::Serialize;

use crate::classification::taxonomy::{Category, Priority, ProviderStage};
use crate::classification::ClassificationTrace;
use crate::email::label_mapper::LabelFailure;
use crate::email::normalized_message::NormalizedMessage;

/// Result of one label operation on one message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub message_id: String,
    pub applied_labels: Vec<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 0 when the item was never dispatched
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

impl BatchOutcome {
    pub fn succeeded(message_id: &str, applied_labels: Vec<String>, attempts: u32) -> Self {
        Self {
            message_id: message_id.to_string(),
            applied_labels,
            success: true,
            error: None,
            attempts,
            verified: None,
        }
    }

    pub fn failed(message_id: &str, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            message_id: message_id.to_string(),
            applied_labels: Vec::new(),
            success: false,
            error: Some(error.into()),
            attempts,
            verified: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationWarning {
    pub message_id: String,
    /// Label ids found in the wrong state after the operation
    pub mismatched_labels: Vec<String>,
    pub detail: String,
}

/// Outcomes of a bulk operation, in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub outcomes: Vec<BatchOutcome>,
    pub verification_warnings: Vec<VerificationWarning>,
}

impl BulkSummary {
    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    pub fn errors(&self) -> Vec<&BatchOutcome> {
        self.outcomes.iter().filter(|o| !o.success).collect()
    }

    pub fn outcome_for(&self, message_id: &str) -> Option<&BatchOutcome> {
        self.outcomes.iter().find(|o| o.message_id == message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFailure {
    pub message_id: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ClassifiedMessage {
    pub message: NormalizedMessage,
    pub trace: ClassificationTrace,
}

/// Everything a run produced, before aggregation.
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub run_id: String,
    pub dry_run: bool,
    pub duration_ms: u64,
    pub classified: Vec<ClassifiedMessage>,
    pub fetch_failures: Vec<FetchFailure>,
    /// Message listing that failed after retries and ended paging early
    pub listing_error: Option<String>,
    pub label_failures: Vec<LabelFailure>,
    /// Setup error that stopped labeling, e.g. a failed label listing
    pub labeling_error: Option<String>,
    pub removals: BulkSummary,
    pub applications: BulkSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    Fetch,
    Classification,
    LabelMapping,
    RemoveLabels,
    ApplyLabels,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub stage: ErrorStage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReport {
    pub message_id: String,
    pub subject: String,
    pub from: String,
    pub category: Category,
    pub confidence: f32,
    pub sentiment: f32,
    pub priority: Priority,
    pub needs_follow_up: bool,
    pub provider: ProviderStage,
    pub reasoning: String,
    pub applied_labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub dry_run: bool,
    pub total_processed: usize,
    pub total_classified: usize,
    pub labels_applied: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<RunError>,
    pub category_breakdown: IndexMap<Category, usize>,
    pub provider_breakdown: IndexMap<ProviderStage, usize>,
    pub fetch_failures: Vec<FetchFailure>,
    pub verification_warnings: Vec<VerificationWarning>,
    pub duration_ms: u64,
    pub messages: Vec<MessageReport>,
}
