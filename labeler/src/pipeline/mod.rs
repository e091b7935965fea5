//! Labeling Pipeline
//!
//! One run moves messages through these components:
//!
//! - **Fetcher**: lists ids for the query and fetches normalized messages
//! - **Classifier**: fallback chain producing one result per message
//! - **Label mapper**: resolves or creates a provider label per category
//! - **Applier**: removes stale taxonomy labels (reclassify) and applies new ones
//! - **Aggregator**: reduces everything into a [`RunSummary`]
//!
//! With `apply_labels = false` the run stops after classification and never
//! touches provider labels.

pub mod aggregator;
pub mod applier;
pub mod fetcher;
pub mod scheduler;
pub mod types;

use std::sync::Arc;

use futures::StreamExt;
use lib_email_clients::gmail::label_colors::GmailLabelColorMap;
use tokio::time::Instant;
use tracing::Instrument;

use crate::app_config::AppConfig;
use crate::classification::taxonomy::Category;
use crate::classification::Classifier;
use crate::email::label_mapper::{LabelMapper, LabelNaming, LabelPalette};
use crate::email::normalized_message::NormalizedMessage;
use crate::email::provider::MailboxProvider;
use crate::error::AppResult;

use applier::{BulkLabelApplier, LabelRequest};
use fetcher::{build_query, FetchedMessages, MessageFetcher};
use scheduler::RetryPolicy;
use types::{ClassifiedMessage, RunRecord, RunSummary};

pub struct LabelingPipeline {
    provider: Arc<dyn MailboxProvider>,
    classifier: Classifier,
    palette: Arc<dyn LabelPalette>,
    config: AppConfig,
}

impl LabelingPipeline {
    pub fn new(provider: Arc<dyn MailboxProvider>, classifier: Classifier, config: AppConfig) -> Self {
        Self {
            provider,
            classifier,
            palette: Arc::new(GmailLabelColorMap::new()),
            config,
        }
    }

    pub fn with_palette(mut self, palette: Arc<dyn LabelPalette>) -> Self {
        self.palette = palette;
        self
    }

    /// Fetch, classify, label and summarize.
    pub async fn run(&self) -> AppResult<RunSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("labeling_run", run_id = %run_id);

        async {
            let started = Instant::now();
            let options = &self.config.pipeline;
            let query = build_query(&options.query, options.unread_only);
            tracing::info!(
                "Starting run: query \"{query}\", max {} messages, model {:?}",
                options.max_results,
                options.ai_model
            );

            let fetcher = MessageFetcher::new(self.provider.clone(), &self.config.fetch)
                .with_retry(self.retry_policy());
            let fetched = fetcher.fetch_all(&query, options.max_results).await;

            self.process(run_id.clone(), started, fetched).await
        }
        .instrument(span)
        .await
    }

    /// Run from already-normalized messages, skipping the fetch stage.
    pub async fn run_on_messages(&self, messages: Vec<NormalizedMessage>) -> AppResult<RunSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("labeling_run", run_id = %run_id);

        let fetched = FetchedMessages {
            messages,
            ..Default::default()
        };
        self.process(run_id.clone(), Instant::now(), fetched)
            .instrument(span)
            .await
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.apply)
    }

    async fn process(
        &self,
        run_id: String,
        started: Instant,
        fetched: FetchedMessages,
    ) -> AppResult<RunSummary> {
        let options = &self.config.pipeline;
        let classified = self.classify_all(fetched.messages).await;

        let mut record = RunRecord {
            run_id,
            dry_run: !options.apply_labels,
            classified,
            fetch_failures: fetched.failed,
            listing_error: fetched.list_error,
            ..Default::default()
        };

        if options.apply_labels {
            self.label(&mut record, started).await;
        } else {
            tracing::info!("Dry run, skipping label application");
        }

        record.duration_ms = started.elapsed().as_millis() as u64;
        let summary = aggregator::aggregate(&record);
        tracing::info!(
            "Run finished in {} ms: {} processed, {} classified, {} labels applied, {} errors",
            summary.duration_ms,
            summary.total_processed,
            summary.total_classified,
            summary.labels_applied,
            summary.errors.len()
        );

        Ok(summary)
    }

    /// Classify with bounded concurrency, keeping fetch order.
    async fn classify_all(&self, messages: Vec<NormalizedMessage>) -> Vec<ClassifiedMessage> {
        let concurrency = self.config.pipeline.classify_concurrency.max(1);
        futures::stream::iter(messages)
            .map(|message| async move {
                let trace = self.classifier.classify_with_trace(&message).await;
                ClassifiedMessage { message, trace }
            })
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .await
    }

    fn wants_label(&self, category: Category) -> bool {
        !category.is_catch_all() || self.config.pipeline.label_uncategorized
    }

    async fn label(&self, record: &mut RunRecord, started: Instant) {
        let options = &self.config.pipeline;
        let mut categories = record
            .classified
            .iter()
            .map(|c| c.trace.result.category)
            .filter(|c| self.wants_label(*c))
            .collect::<Vec<_>>();
        categories.sort();
        categories.dedup();

        let mut mapper = LabelMapper::new(
            self.provider.clone(),
            self.palette.clone(),
            LabelNaming::new(&self.config.labels.prefix),
        )
        .with_color_overrides(self.config.labels.colors.clone())
        .with_retry(self.retry_policy());

        let resolved = match mapper.ensure_all_labels(&categories).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!("Could not resolve labels, skipping label application: {e}");
                record.labeling_error = Some(e.to_string());
                return;
            }
        };
        record.label_failures = mapper.failures().to_vec();

        let mapping = mapper.mapping();
        let applier = BulkLabelApplier::from_config(self.provider.clone(), &self.config.apply, started)
            .with_verification(options.verify);

        if options.reclassify {
            let taxonomy_ids = mapping.label_ids();
            let removals = record
                .classified
                .iter()
                .filter_map(|c| {
                    let target = resolved.get(&c.trace.result.category);
                    let stale = c
                        .message
                        .label_ids
                        .iter()
                        .filter(|id| taxonomy_ids.contains(id.as_str()))
                        .filter(|id| Some(*id) != target)
                        .cloned()
                        .collect::<Vec<_>>();
                    (!stale.is_empty()).then(|| LabelRequest::new(&c.message.id, stale))
                })
                .collect::<Vec<_>>();
            tracing::info!("Removing stale labels from {} messages", removals.len());
            record.removals = applier.bulk_remove(removals).await;
        }

        let requests = record
            .classified
            .iter()
            .filter(|c| self.wants_label(c.trace.result.category))
            .filter_map(|c| {
                let label_id = resolved.get(&c.trace.result.category);
                if label_id.is_none() {
                    tracing::warn!(
                        "No label for {} on message {}, skipping",
                        c.trace.result.category,
                        c.message.id
                    );
                }
                label_id.map(|id| LabelRequest::new(&c.message.id, vec![id.clone()]))
            })
            .collect::<Vec<_>>();
        record.applications = applier.bulk_apply(requests).await;
    }
}
