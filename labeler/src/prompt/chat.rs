use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use crate::app_config::ProviderConfig;
use crate::error::{AppError, AppResult};
use crate::rate_limiters::RateLimiters;
use crate::HttpClient;

use super::{ChatApiError, ChatApiResponseOrError};

/// A chat-completions backend returning the raw content of the first choice.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> AppResult<String>;
}

/// OpenAI-compatible chat client (Mistral and Groq both speak this dialect).
#[derive(Clone)]
pub struct ChatCompletionClient {
    http_client: HttpClient,
    provider: ProviderConfig,
    api_key: String,
    rate_limiters: RateLimiters,
}

impl ChatCompletionClient {
    pub fn new(http_client: HttpClient, provider: &ProviderConfig) -> AppResult<Self> {
        let api_key = provider
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config(format!("No API key configured for {}", provider.name))
            })?;

        Ok(Self {
            http_client,
            provider: provider.clone(),
            api_key,
            rate_limiters: RateLimiters::from_limits(&provider.prompt_limits),
        })
    }

    fn on_api_error(&self, error: ChatApiError) -> AppError {
        if is_rate_limit_message(&error.message) {
            self.rate_limiters.trigger_backoff();
            return AppError::TooManyRequests;
        }
        AppError::InvalidResponse(format!("{} API error: {}", self.provider.name, error.message))
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    message.to_lowercase().contains("rate limit")
}

#[async_trait]
impl ChatCompletion for ChatCompletionClient {
    fn name(&self) -> &str {
        &self.provider.name
    }

    async fn complete(&self, system: &str, user: &str) -> AppResult<String> {
        self.rate_limiters.acquire_one().await;

        let resp = self
            .http_client
            .post(&self.provider.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!(
              {
                "model": &self.provider.model,
                "temperature": self.provider.temperature,
                "messages": [
                  {
                    "role": "system",
                    "content": system
                  },
                  {
                    "role": "user",
                    "content": user
                  }
                ],
                "response_format": {
                    "type": "json_object",
                }
              }
            ))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.rate_limiters.trigger_backoff();
            return Err(AppError::TooManyRequests);
        }

        let parsed = serde_json::from_str::<ChatApiResponseOrError>(&body);
        let parsed = match parsed {
            Ok(ChatApiResponseOrError::Response(parsed)) if status.is_success() => parsed,
            Ok(ChatApiResponseOrError::Error(error))
            | Ok(ChatApiResponseOrError::NestedError { error }) => {
                return Err(self.on_api_error(error));
            }
            _ if !status.is_success() => return Err(AppError::from_status(status, body)),
            _ => {
                return Err(AppError::InvalidResponse(format!(
                    "Could not parse chat response: {body}"
                )))
            }
        };

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                provider = %self.provider.name,
                total_tokens = usage.total_tokens,
                "Chat completion usage"
            );
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .context("No choices in response")?;

        Ok(choice.message.content)
    }
}
