use std::sync::Arc;

use crate::app_config::{AiModel, ModelsConfig, ProviderConfig};
use crate::email::normalized_message::NormalizedMessage;
use crate::error::{AppError, AppResult};
use crate::prompt::{ChatCompletion, ChatCompletionClient};
use crate::HttpClient;

use super::ai_strategy::AiClassifier;
use super::rule_based::RuleBasedClassifier;
use super::taxonomy::{ClassificationResult, ProviderStage};
use super::ClassificationStrategy;

#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub stage: ProviderStage,
    pub error: String,
}

/// A result plus the failures of every stage tried before it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationTrace {
    pub result: ClassificationResult,
    pub failures: Vec<StageFailure>,
}

impl ClassificationTrace {
    /// The chain ran out of stages; only possible when fallback is disabled.
    pub fn is_exhausted(&self) -> bool {
        self.result.provider == ProviderStage::CatchAll
    }
}

/// Runs strategies in order until one returns a result. When every strategy
/// fails the message gets the catch-all result.
#[derive(Clone)]
pub struct Classifier {
    strategies: Vec<Arc<dyn ClassificationStrategy>>,
}

impl Classifier {
    pub fn new(strategies: Vec<Arc<dyn ClassificationStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn rules_only() -> Self {
        Self::new(vec![Arc::new(RuleBasedClassifier)])
    }

    /// Build the chain for the selected model. An explicitly selected provider
    /// without an API key is a configuration error; in auto mode it is skipped.
    pub fn from_config(
        ai_model: AiModel,
        models: &ModelsConfig,
        http_client: &HttpClient,
    ) -> AppResult<Self> {
        let ai = |provider: &ProviderConfig, stage: ProviderStage| -> AppResult<_> {
            let chat = ChatCompletionClient::new(http_client.clone(), provider)?;
            Ok(Arc::new(AiClassifier::new(
                Arc::new(chat) as Arc<dyn ChatCompletion>,
                stage,
                models.max_body_chars,
            )) as Arc<dyn ClassificationStrategy>)
        };

        let strategies = match ai_model {
            AiModel::Auto => {
                let mut strategies = Vec::new();
                for (provider, stage) in [
                    (&models.primary, ProviderStage::Primary),
                    (&models.secondary, ProviderStage::Secondary),
                ] {
                    if provider.is_configured() {
                        strategies.push(ai(provider, stage)?);
                    } else {
                        tracing::info!("Skipping {stage} provider {}: no API key", provider.name);
                    }
                }
                strategies.push(Arc::new(RuleBasedClassifier) as Arc<dyn ClassificationStrategy>);
                strategies
            }
            AiModel::Primary => vec![ai(&models.primary, ProviderStage::Primary)?],
            AiModel::Secondary => vec![ai(&models.secondary, ProviderStage::Secondary)?],
            AiModel::Rules => {
                vec![Arc::new(RuleBasedClassifier) as Arc<dyn ClassificationStrategy>]
            }
        };

        if strategies.is_empty() {
            return Err(AppError::Config("No classification stage available".to_string()));
        }

        Ok(Self::new(strategies))
    }

    pub fn stages(&self) -> Vec<ProviderStage> {
        self.strategies.iter().map(|s| s.stage()).collect()
    }

    pub async fn classify(&self, message: &NormalizedMessage) -> ClassificationResult {
        self.classify_with_trace(message).await.result
    }

    pub async fn classify_with_trace(&self, message: &NormalizedMessage) -> ClassificationTrace {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let stage = strategy.stage();
            match strategy.classify(message).await {
                Ok(result) => {
                    if !failures.is_empty() {
                        tracing::warn!(
                            message_id = %message.id,
                            "Classified by fallback stage {stage} after {} failure(s)",
                            failures.len()
                        );
                    }
                    tracing::debug!(
                        message_id = %message.id,
                        category = %result.category,
                        confidence = result.confidence,
                        "Classified by {stage}"
                    );
                    return ClassificationTrace { result, failures };
                }
                Err(e) => {
                    tracing::warn!(message_id = %message.id, "Stage {stage} failed: {e}");
                    failures.push(StageFailure {
                        stage,
                        error: e.to_string(),
                    });
                }
            }
        }

        let reason = failures
            .iter()
            .map(|f| format!("{}: {}", f.stage, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        ClassificationTrace {
            result: ClassificationResult::catch_all(format!("All stages failed ({reason})")),
            failures,
        }
    }
}
