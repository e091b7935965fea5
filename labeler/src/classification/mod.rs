pub mod ai_strategy;
pub mod orchestrator;
pub mod rule_based;
pub mod taxonomy;

use async_trait::async_trait;

use crate::email::normalized_message::NormalizedMessage;
use crate::error::AppResult;

pub use orchestrator::{ClassificationTrace, Classifier};
use taxonomy::{ClassificationResult, ProviderStage};

/// One link of the fallback chain.
#[async_trait]
pub trait ClassificationStrategy: Send + Sync {
    fn stage(&self) -> ProviderStage;

    async fn classify(&self, message: &NormalizedMessage) -> AppResult<ClassificationResult>;
}
