use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use google_gmail1::api::{Label, LabelColor, ListLabelsResponse, ListMessagesResponse};
use leaky_bucket::RateLimiter;
use lib_email_clients::gmail::{
    api_quota::{GMAIL_API_QUOTA, GMAIL_QUOTA_PER_SECOND},
    message::{GmailMessage, MessageFormat},
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{
    email::provider::{LabelChange, MailboxProvider, MessageIdPage},
    error::{AppError, AppResult},
    HttpClient,
};

/// Gmail API error response structure
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiError {
    pub error: GmailApiErrorDetail,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiErrorDetail {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

pub const MAX_MESSAGES_PER_PAGE: u32 = 500;

/// Gmail REST client for a single mailbox.
#[derive(Debug, Clone)]
pub struct EmailClient {
    http_client: HttpClient,
    access_token: String,
    rate_limiter: Arc<RateLimiter>,
}

impl EmailClient {
    pub fn from_access_token(http_client: HttpClient, access_token: String) -> EmailClient {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(GMAIL_QUOTA_PER_SECOND)
                .max(GMAIL_QUOTA_PER_SECOND)
                .interval(Duration::from_secs(1))
                .refill(GMAIL_QUOTA_PER_SECOND)
                .build(),
        );

        EmailClient {
            http_client,
            access_token,
            rate_limiter,
        }
    }
}

/// Map a non-success response to an [`AppError`], reading Gmail's error body when present.
async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> AppResult<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GmailApiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(AppError::from_status(status, message));
    }

    Ok(resp.json::<T>().await?)
}

#[async_trait]
impl MailboxProvider for EmailClient {
    async fn list_message_ids(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> AppResult<MessageIdPage> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_list)
            .await;

        let max_results = max_results.clamp(1, MAX_MESSAGES_PER_PAGE);
        let mut params = vec![
            ("q".to_string(), query.to_string()),
            ("maxResults".to_string(), max_results.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken".to_string(), token.to_string()));
        }

        let resp = self
            .http_client
            .get(gmail_url!("messages"))
            .query(&params)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let data = parse_response::<ListMessagesResponse>(resp).await?;

        Ok(MessageIdPage {
            ids: data
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect(),
            next_page_token: data.next_page_token,
        })
    }

    async fn get_message(&self, id: &str, format: MessageFormat) -> AppResult<GmailMessage> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_get)
            .await;

        let resp = self
            .http_client
            .get(gmail_url!("messages", id))
            .bearer_auth(&self.access_token)
            .query(&[("format", format.as_str())])
            .send()
            .await?;

        parse_response::<GmailMessage>(resp).await
    }

    async fn list_labels(&self) -> AppResult<Vec<Label>> {
        self.rate_limiter.acquire(GMAIL_API_QUOTA.labels_list).await;

        let resp = self
            .http_client
            .get(gmail_url!("labels"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let data = parse_response::<ListLabelsResponse>(resp).await?;

        Ok(data.labels.unwrap_or_default())
    }

    async fn create_label(&self, name: &str, color: LabelColor) -> AppResult<String> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.labels_create)
            .await;

        let resp = self
            .http_client
            .post(gmail_url!("labels"))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "name": name,
                "type": "user",
                "messageListVisibility": "show",
                "labelListVisibility": "labelShow",
                "color": {
                    "backgroundColor": color.background_color,
                    "textColor": color.text_color,
                },
            }))
            .send()
            .await?;
        let label = parse_response::<Label>(resp).await?;

        Ok(label
            .id
            .context(format!("Created label {name} has no id"))?)
    }

    async fn modify_message_labels(&self, id: &str, change: &LabelChange) -> AppResult<()> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_modify)
            .await;

        let resp = self
            .http_client
            .post(gmail_url!("messages", id, "modify"))
            .bearer_auth(&self.access_token)
            .json(change)
            .send()
            .await?;
        parse_response::<serde_json::Value>(resp).await?;

        Ok(())
    }
}
