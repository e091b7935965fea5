use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use google_gmail1::api::LabelColor;
use lib_email_clients::gmail::label_colors::GmailLabelColorMap;
use strum::IntoEnumIterator;

use crate::classification::taxonomy::Category;
use crate::email::provider::MailboxProvider;
use crate::error::AppResult;
use crate::pipeline::scheduler::RetryPolicy;

/// Maps a desired semantic color onto a pair the provider accepts.
pub trait LabelPalette: Send + Sync {
    fn resolve(&self, desired: &str) -> LabelColor;
}

impl LabelPalette for GmailLabelColorMap {
    fn resolve(&self, desired: &str) -> LabelColor {
        self.get(desired)
    }
}

/// `<prefix>/<Category>` label names.
#[derive(Debug, Clone)]
pub struct LabelNaming {
    prefix: String,
}

impl LabelNaming {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn label_name(&self, category: Category) -> String {
        if self.prefix.is_empty() {
            category.to_string()
        } else {
            format!("{}/{}", self.prefix, category)
        }
    }
}

impl Default for LabelNaming {
    fn default() -> Self {
        Self::new("AI")
    }
}

#[derive(Debug, Clone)]
pub struct MappedLabel {
    pub label_id: String,
    pub label_name: String,
    pub color: Option<LabelColor>,
}

/// Category to provider label for one run.
#[derive(Debug, Clone, Default)]
pub struct LabelMapping {
    labels: HashMap<Category, MappedLabel>,
}

impl LabelMapping {
    pub fn get(&self, category: Category) -> Option<&MappedLabel> {
        self.labels.get(&category)
    }

    pub fn label_id(&self, category: Category) -> Option<&str> {
        self.labels.get(&category).map(|l| l.label_id.as_str())
    }

    /// Ids of every taxonomy label known for this run.
    pub fn label_ids(&self) -> HashSet<&str> {
        self.labels.values().map(|l| l.label_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelFailure {
    pub category: Category,
    pub label_name: String,
    pub error: String,
}

pub struct LabelMapper {
    provider: Arc<dyn MailboxProvider>,
    palette: Arc<dyn LabelPalette>,
    naming: LabelNaming,
    color_overrides: HashMap<String, String>,
    retry: RetryPolicy,
    mapping: LabelMapping,
    loaded: bool,
    failures: Vec<LabelFailure>,
}

impl LabelMapper {
    pub fn new(
        provider: Arc<dyn MailboxProvider>,
        palette: Arc<dyn LabelPalette>,
        naming: LabelNaming,
    ) -> Self {
        Self {
            provider,
            palette,
            naming,
            color_overrides: HashMap::new(),
            retry: RetryPolicy::default(),
            mapping: LabelMapping::default(),
            loaded: false,
            failures: Vec::new(),
        }
    }

    /// Keys are lower-cased category names.
    pub fn with_color_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.color_overrides = overrides
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn naming(&self) -> &LabelNaming {
        &self.naming
    }

    pub fn failures(&self) -> &[LabelFailure] {
        &self.failures
    }

    /// The mapping built so far; empty before the first listing.
    pub fn mapping(&self) -> &LabelMapping {
        &self.mapping
    }

    fn desired_color(&self, category: Category) -> &str {
        self.color_overrides
            .get(&category.as_ref().to_lowercase())
            .map(String::as_str)
            .unwrap_or(category.desired_color())
    }

    /// Lists provider labels once per run and indexes the taxonomy labels by name.
    async fn load(&mut self) -> AppResult<()> {
        if !self.loaded {
            let labels = self
                .retry
                .run(|_| self.provider.list_labels())
                .await
                .result?;
            let by_name = labels
                .into_iter()
                .filter_map(|label| Some((label.name.clone()?, label)))
                .collect::<HashMap<_, _>>();

            let mut mapping = LabelMapping::default();
            for category in Category::iter() {
                let label_name = self.naming.label_name(category);
                if let Some(label_id) = by_name.get(&label_name).and_then(|l| l.id.clone()) {
                    let color = by_name.get(&label_name).and_then(|l| l.color.clone());
                    mapping.labels.insert(
                        category,
                        MappedLabel {
                            label_id,
                            label_name,
                            color,
                        },
                    );
                }
            }
            tracing::debug!("Found {} existing taxonomy labels", mapping.len());
            self.mapping = mapping;
            self.loaded = true;
        }

        Ok(())
    }

    pub async fn resolve_label(&mut self, category: Category) -> AppResult<Option<String>> {
        let resolved = self.ensure_all_labels(&[category]).await?;
        Ok(resolved.get(&category).cloned())
    }

    /// Resolve every category to a label id, creating missing labels
    /// concurrently. Categories whose creation failed are left out of the
    /// returned map and recorded in [`LabelMapper::failures`]; they are not
    /// attempted again during the run.
    pub async fn ensure_all_labels(
        &mut self,
        categories: &[Category],
    ) -> AppResult<HashMap<Category, String>> {
        let mut wanted = categories.to_vec();
        wanted.sort();
        wanted.dedup();

        let failed = self
            .failures
            .iter()
            .map(|f| f.category)
            .collect::<HashSet<_>>();
        self.load().await?;
        let missing = wanted
            .iter()
            .copied()
            .filter(|c| self.mapping.get(*c).is_none() && !failed.contains(c))
            .collect::<Vec<_>>();

        if !missing.is_empty() {
            let requests = missing
                .into_iter()
                .map(|category| {
                    let label_name = self.naming.label_name(category);
                    let color = self.palette.resolve(self.desired_color(category));
                    (category, label_name, color)
                })
                .collect::<Vec<_>>();

            let provider = self.provider.clone();
            let retry = self.retry;
            let created = join_all(requests.into_iter().map(|(category, label_name, color)| {
                let provider = provider.clone();
                async move {
                    let result = retry
                        .run(|_| provider.create_label(&label_name, color.clone()))
                        .await
                        .result;
                    (category, label_name, color, result)
                }
            }))
            .await;

            let mut new_labels = Vec::new();
            for (category, label_name, color, result) in created {
                match result {
                    Ok(label_id) => {
                        tracing::info!("Created label {label_name} ({label_id})");
                        new_labels.push((
                            category,
                            MappedLabel {
                                label_id,
                                label_name,
                                color: Some(color),
                            },
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("Could not create label {label_name}: {e}");
                        self.failures.push(LabelFailure {
                            category,
                            label_name,
                            error: e.to_string(),
                        });
                    }
                }
            }

            self.mapping.labels.extend(new_labels);
        }

        Ok(wanted
            .into_iter()
            .filter_map(|c| self.mapping.label_id(c).map(|id| (c, id.to_string())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::AppError;
    use crate::testing::common::MockMailbox;

    fn mapper(mailbox: &Arc<MockMailbox>) -> LabelMapper {
        LabelMapper::new(
            mailbox.clone(),
            Arc::new(GmailLabelColorMap::new()),
            LabelNaming::default(),
        )
        .with_retry(RetryPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_millis(50),
        ))
    }

    #[test]
    fn test_label_naming() {
        assert_eq!(LabelNaming::default().label_name(Category::Finance), "AI/Finance");
        assert_eq!(LabelNaming::new("Auto/").label_name(Category::Work), "Auto/Work");
        assert_eq!(LabelNaming::new("").label_name(Category::Work), "Work");
    }

    #[tokio::test]
    async fn test_creates_missing_labels_with_allowed_colors() {
        let mailbox = Arc::new(MockMailbox::new());
        let mut mapper = mapper(&mailbox);

        let categories = [Category::Finance, Category::Work, Category::Social];
        let resolved = mapper.ensure_all_labels(&categories).await.unwrap();

        assert_eq!(resolved.len(), 3);
        assert_eq!(mailbox.created_labels().len(), 3);
        for label in mailbox.labels() {
            let color = label.color.expect("created labels carry a color");
            assert!(GmailLabelColorMap::is_allowed(&color));
        }
        assert_eq!(mailbox.list_labels_calls(), 1);
    }

    #[tokio::test]
    async fn test_ensure_all_labels_is_idempotent() {
        let mailbox = Arc::new(MockMailbox::new());
        let mut mapper = mapper(&mailbox);

        let first = mapper
            .ensure_all_labels(&[Category::Finance, Category::Urgent])
            .await
            .unwrap();
        let second = mapper
            .ensure_all_labels(&[Category::Urgent, Category::Finance, Category::Finance])
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(mailbox.created_labels().len(), 2);
        assert_eq!(mailbox.list_labels_calls(), 1);
    }

    #[tokio::test]
    async fn test_reuses_existing_labels_by_name() {
        let mailbox = Arc::new(MockMailbox::new());
        let existing = mailbox.add_label("AI/Career");
        mailbox.add_label("Career");
        let mut mapper = mapper(&mailbox);

        let id = mapper.resolve_label(Category::Career).await.unwrap();
        assert_eq!(id, Some(existing));
        assert!(mailbox.created_labels().is_empty());
    }

    #[tokio::test]
    async fn test_creation_failure_returns_successful_subset() {
        let mailbox = Arc::new(MockMailbox::new());
        mailbox.fail_label_creation("AI/Promotional");
        let mut mapper = mapper(&mailbox);

        let resolved = mapper
            .ensure_all_labels(&[Category::Promotional, Category::Personal])
            .await
            .unwrap();

        assert!(resolved.contains_key(&Category::Personal));
        assert!(!resolved.contains_key(&Category::Promotional));
        assert_eq!(mapper.failures().len(), 1);
        assert_eq!(mapper.failures()[0].category, Category::Promotional);

        // Not attempted again in the same run
        mapper.ensure_all_labels(&[Category::Promotional]).await.unwrap();
        assert_eq!(mailbox.create_label_calls(), 2);
    }

    #[tokio::test]
    async fn test_color_override() {
        let mailbox = Arc::new(MockMailbox::new());
        let mut mapper = mapper(&mailbox).with_color_overrides(HashMap::from([(
            "Finance".to_string(),
            "red".to_string(),
        )]));

        mapper.ensure_all_labels(&[Category::Finance]).await.unwrap();

        let label = mailbox.labels().into_iter().next().unwrap();
        let red = GmailLabelColorMap::new().get("red");
        assert_eq!(label.color.unwrap().background_color, red.background_color);
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned() {
        let mailbox = Arc::new(MockMailbox::new());
        mailbox.fail_list_labels(AppError::Unauthorized("expired token".to_string()));
        let mut mapper = mapper(&mailbox);

        let result = mapper.ensure_all_labels(&[Category::Work]).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
        assert!(mapper.mapping().is_empty());
        assert!(mailbox.created_labels().is_empty());
    }

    #[tokio::test]
    async fn test_throttled_listing_is_retried() {
        let mailbox = Arc::new(MockMailbox::new());
        mailbox.fail_list_labels(AppError::TooManyRequests);
        let mut mapper = mapper(&mailbox);

        let resolved = mapper.ensure_all_labels(&[Category::Work]).await.unwrap();

        assert!(resolved.contains_key(&Category::Work));
        assert_eq!(mailbox.list_labels_calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_creation_failure_is_retried() {
        let mailbox = Arc::new(MockMailbox::new());
        mailbox.throttle_label_creation("AI/Finance", 2);
        let mut mapper = mapper(&mailbox);

        let resolved = mapper.ensure_all_labels(&[Category::Finance]).await.unwrap();

        assert!(resolved.contains_key(&Category::Finance));
        assert!(mapper.failures().is_empty());
        assert_eq!(mailbox.create_label_calls(), 3);
    }
}
