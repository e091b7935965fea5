use std::sync::Arc;

use async_trait::async_trait;

use crate::email::normalized_message::NormalizedMessage;
use crate::error::AppResult;
use crate::prompt::{categorization_user_prompt, parse_category_answer, system_prompt, ChatCompletion};

use super::taxonomy::{ClassificationResult, ProviderStage};
use super::ClassificationStrategy;

/// Classifies a message by prompting a chat model for a JSON answer.
pub struct AiClassifier {
    chat: Arc<dyn ChatCompletion>,
    stage: ProviderStage,
    system_prompt: String,
    max_body_chars: usize,
}

impl AiClassifier {
    pub fn new(chat: Arc<dyn ChatCompletion>, stage: ProviderStage, max_body_chars: usize) -> Self {
        Self {
            chat,
            stage,
            system_prompt: system_prompt(),
            max_body_chars,
        }
    }
}

#[async_trait]
impl ClassificationStrategy for AiClassifier {
    fn stage(&self) -> ProviderStage {
        self.stage
    }

    async fn classify(&self, message: &NormalizedMessage) -> AppResult<ClassificationResult> {
        let user_content = categorization_user_prompt(
            &message.subject,
            &message.from,
            &message.body,
            self.max_body_chars,
        );

        let content = self.chat.complete(&self.system_prompt, &user_content).await?;
        let answer = parse_category_answer(&content).inspect_err(|e| {
            tracing::warn!(
                provider = self.chat.name(),
                message_id = %message.id,
                "Unusable classification answer: {e}"
            );
        })?;

        Ok(ClassificationResult {
            category: answer.category,
            confidence: answer.confidence,
            sentiment: answer.sentiment,
            priority: answer.priority,
            needs_follow_up: answer.needs_follow_up,
            follow_up_suggestion: answer.follow_up_suggestion,
            suggested_response: answer.suggested_response,
            reasoning: answer.reasoning,
            provider: self.stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::taxonomy::{Category, Priority};
    use crate::error::AppError;
    use crate::testing::common::{message_with, ScriptedChat};

    #[tokio::test]
    async fn test_maps_answer_to_result() {
        let chat = ScriptedChat::always(
            "mistral",
            r#"{"category": "Finance", "confidence": 0.9, "priority": "high", "reasoning": "invoice"}"#,
        );
        let classifier = AiClassifier::new(chat.clone(), ProviderStage::Primary, 4000);

        let msg = message_with("m1", "Invoice #12", "billing@acme.com", "Amount due");
        let result = classifier.classify(&msg).await.unwrap();

        assert_eq!(result.category, Category::Finance);
        assert_eq!(result.priority, Priority::High);
        assert_eq!(result.provider, ProviderStage::Primary);
        assert_eq!(chat.calls(), 1);
        let prompt = chat.last_user_prompt().unwrap();
        assert!(prompt.contains("<subject>Invoice #12</subject>"));
    }

    #[tokio::test]
    async fn test_truncates_body_in_prompt() {
        let chat = ScriptedChat::always("groq", r#"{"category": "Work"}"#);
        let classifier = AiClassifier::new(chat.clone(), ProviderStage::Secondary, 10);

        let msg = message_with("m1", "Report", "a@corp.com", &"x".repeat(50));
        classifier.classify(&msg).await.unwrap();

        let prompt = chat.last_user_prompt().unwrap();
        assert!(prompt.contains(&format!("<body>{}</body>", "x".repeat(10))));
    }

    #[tokio::test]
    async fn test_unusable_answer_is_an_error() {
        let chat = ScriptedChat::always("mistral", "I think this is Finance");
        let classifier = AiClassifier::new(chat, ProviderStage::Primary, 4000);

        let msg = message_with("m1", "Invoice", "a@b.com", "");
        let err = classifier.classify(&msg).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidResponse(_)));
    }
}
