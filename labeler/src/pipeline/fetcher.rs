//! Message Fetcher
//!
//! Lists message ids for a query, then fetches full details in small
//! concurrent sub-batches and normalizes them. Every provider call goes
//! through the [`RetryPolicy`]; only transient errors are retried.

use std::sync::Arc;

use anyhow::anyhow;
use lib_email_clients::gmail::message::MessageFormat;

use crate::app_config::FetchConfig;
use crate::email::normalized_message::NormalizedMessage;
use crate::email::provider::MailboxProvider;
use crate::error::{AppError, AppResult};

use super::scheduler::{BatchScheduler, RetryPolicy};
use super::types::FetchFailure;

#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub messages: Vec<NormalizedMessage>,
    /// Ids whose detail fetch failed
    pub failed: Vec<FetchFailure>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedMessages {
    pub messages: Vec<NormalizedMessage>,
    pub failed: Vec<FetchFailure>,
    /// Listing error that ended paging early; earlier pages are kept
    pub list_error: Option<String>,
}

pub struct MessageFetcher {
    provider: Arc<dyn MailboxProvider>,
    scheduler: BatchScheduler,
    retry: RetryPolicy,
    page_size: u32,
}

/// Append `is:unread` unless the query already asks for it.
pub fn build_query(query: &str, unread_only: bool) -> String {
    let query = query.trim();
    if !unread_only || query.split_whitespace().any(|t| t == "is:unread") {
        return query.to_string();
    }
    if query.is_empty() {
        "is:unread".to_string()
    } else {
        format!("{query} is:unread")
    }
}

impl MessageFetcher {
    pub fn new(provider: Arc<dyn MailboxProvider>, config: &FetchConfig) -> Self {
        Self {
            provider,
            scheduler: BatchScheduler::new(config.batch_size, config.batch_delay()),
            retry: RetryPolicy::default(),
            page_size: config.page_size,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One page: list ids, then fetch each in full.
    pub async fn fetch_messages(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> AppResult<FetchedPage> {
        let page = self
            .retry
            .run(|_| self.provider.list_message_ids(query, max_results, page_token))
            .await
            .result?;
        tracing::debug!("Listed {} message ids", page.ids.len());

        let fetched = self
            .scheduler
            .run(
                page.ids,
                |id| {
                    let provider = self.provider.clone();
                    let retry = self.retry;
                    async move {
                        let attempted = retry
                            .run(|_| provider.get_message(&id, MessageFormat::Full))
                            .await;
                        (id, attempted.result)
                    }
                },
                |id| (id, Err(AppError::Internal(anyhow!("Fetch not dispatched")))),
            )
            .await;

        let mut messages = Vec::with_capacity(fetched.len());
        let mut failed = Vec::new();
        for (id, result) in fetched {
            match result {
                Ok(msg) => messages.push(NormalizedMessage::from_gmail_message(&msg)),
                Err(e) => {
                    tracing::warn!("Skipping message {id}: {e}");
                    failed.push(FetchFailure {
                        message_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(FetchedPage {
            messages,
            failed,
            next_page_token: page.next_page_token,
        })
    }

    /// Follow page tokens until `max_results` ids were listed or no page remains.
    /// A listing that still fails after retries stops paging; whatever was
    /// fetched before it is returned along with the error.
    pub async fn fetch_all(&self, query: &str, max_results: u32) -> FetchedMessages {
        let mut all = FetchedMessages::default();
        let mut listed = 0;
        let mut page_token: Option<String> = None;

        while listed < max_results {
            let page_max = (max_results - listed).min(self.page_size);
            let page = match self
                .fetch_messages(query, page_max, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!("Listing messages failed after {listed} ids, stopping: {e}");
                    all.list_error = Some(e.to_string());
                    break;
                }
            };

            listed += (page.messages.len() + page.failed.len()) as u32;
            all.messages.extend(page.messages);
            all.failed.extend(page.failed);

            match page.next_page_token {
                Some(token) if listed > 0 => page_token = Some(token),
                _ => break,
            }
        }

        tracing::info!(
            "Fetched {} messages ({} failed) for query \"{query}\"",
            all.messages.len(),
            all.failed.len()
        );
        all
    }
}
