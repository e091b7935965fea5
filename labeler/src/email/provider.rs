use async_trait::async_trait;
use google_gmail1::api::{Label, LabelColor};
use lib_email_clients::gmail::message::{GmailMessage, MessageFormat};
use serde::Serialize;

use crate::error::AppResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageIdPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelChange {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_label_ids: Vec<String>,
}

impl LabelChange {
    pub fn add(label_ids: Vec<String>) -> Self {
        Self {
            add_label_ids: label_ids,
            remove_label_ids: Vec::new(),
        }
    }

    pub fn remove(label_ids: Vec<String>) -> Self {
        Self {
            add_label_ids: Vec::new(),
            remove_label_ids: label_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add_label_ids.is_empty() && self.remove_label_ids.is_empty()
    }
}

/// The mailbox operations the pipeline depends on.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    async fn list_message_ids(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> AppResult<MessageIdPage>;

    async fn get_message(&self, id: &str, format: MessageFormat) -> AppResult<GmailMessage>;

    async fn list_labels(&self) -> AppResult<Vec<Label>>;

    /// Returns the id of the created label.
    async fn create_label(&self, name: &str, color: LabelColor) -> AppResult<String>;

    async fn modify_message_labels(&self, id: &str, change: &LabelChange) -> AppResult<()>;
}
