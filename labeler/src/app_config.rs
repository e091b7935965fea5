use std::{collections::HashMap, env, path::Path, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Which classification stages a run may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiModel {
    /// Primary, then secondary, then the rule engine
    #[default]
    Auto,
    #[serde(alias = "mistral")]
    Primary,
    #[serde(alias = "groq")]
    Secondary,
    #[serde(alias = "rule_based")]
    Rules,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Provider search filter, passed through verbatim
    pub query: String,
    pub unread_only: bool,
    pub max_results: u32,
    /// false = dry run, classify only
    pub apply_labels: bool,
    pub verify: bool,
    pub reclassify: bool,
    pub label_uncategorized: bool,
    pub ai_model: AiModel,
    pub classify_concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            query: "in:inbox".to_string(),
            unread_only: false,
            max_results: 50,
            apply_labels: true,
            verify: false,
            reclassify: false,
            label_uncategorized: false,
            ai_model: AiModel::Auto,
            classify_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Detail calls issued concurrently per sub-batch
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Upper bound of ids requested per list call
    pub page_size: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 100,
            page_size: 100,
        }
    }
}

impl FetchConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Maximum attempts per message, first try included
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Stop dispatching further batches once this many seconds have passed
    pub deadline_secs: Option<u64>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 200,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub prefix: String,
    /// Lower-cased category name -> desired semantic color, overriding the built-in choice
    pub colors: HashMap<String, String>,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            prefix: "AI".to_string(),
            colors: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptLimits {
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 5,
            refill_interval_ms: 1_000,
            refill_amount: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is not set in the file
    pub api_key_env: Option<String>,
    pub prompt_limits: PromptLimits,
}

impl ProviderConfig {
    pub fn mistral() -> Self {
        Self {
            name: "mistral".to_string(),
            endpoint: "https://api.mistral.ai/v1/chat/completions".to_string(),
            model: "mistral-small-latest".to_string(),
            temperature: 0.1,
            api_key: None,
            api_key_env: Some("MISTRAL_API_KEY".to_string()),
            prompt_limits: PromptLimits::default(),
        }
    }

    pub fn groq() -> Self {
        Self {
            name: "groq".to_string(),
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.1,
            api_key: None,
            api_key_env: Some("GROQ_API_KEY".to_string()),
            prompt_limits: PromptLimits::default(),
        }
    }

    /// A provider without a usable key is treated as unconfigured.
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    fn resolve_api_key(&mut self) {
        if self.is_configured() {
            return;
        }
        self.api_key = self
            .api_key_env
            .as_deref()
            .and_then(|var| env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
    }
}

/// A provider stage as written in the file. Unset keys keep the stage's
/// built-in provider values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    name: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    api_key: Option<String>,
    api_key_env: Option<String>,
    prompt_limits: Option<PromptLimits>,
}

impl ProviderSection {
    fn over(self, base: ProviderConfig) -> ProviderConfig {
        ProviderConfig {
            name: self.name.unwrap_or(base.name),
            endpoint: self.endpoint.unwrap_or(base.endpoint),
            model: self.model.unwrap_or(base.model),
            temperature: self.temperature.unwrap_or(base.temperature),
            api_key: self.api_key.or(base.api_key),
            api_key_env: self.api_key_env.or(base.api_key_env),
            prompt_limits: self.prompt_limits.unwrap_or(base.prompt_limits),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    primary: ProviderSection,
    secondary: ProviderSection,
    max_body_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(from = "ModelsSection")]
pub struct ModelsConfig {
    pub primary: ProviderConfig,
    pub secondary: ProviderConfig,
    /// Body characters embedded into a prompt
    pub max_body_chars: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig::mistral(),
            secondary: ProviderConfig::groq(),
            max_body_chars: 4_000,
        }
    }
}

impl From<ModelsSection> for ModelsConfig {
    fn from(section: ModelsSection) -> Self {
        let defaults = ModelsConfig::default();
        Self {
            primary: section.primary.over(defaults.primary),
            secondary: section.secondary.over(defaults.secondary),
            max_body_chars: section.max_body_chars.unwrap_or(defaults.max_body_chars),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GmailConfig {
    pub request_timeout_secs: u64,
    pub access_token: Option<String>,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineOptions,
    pub fetch: FetchConfig,
    pub apply: ApplyConfig,
    pub labels: LabelConfig,
    pub models: ModelsConfig,
    pub gmail: GmailConfig,
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Labeler Config:\n{:?}\n\nFetch: {:?}\n\nApply: {:?}\n\nLabels: {:?}\n\nPrimary: {} ({}, configured: {})\nSecondary: {} ({}, configured: {})",
            self.pipeline,
            self.fetch,
            self.apply,
            self.labels,
            self.models.primary.name,
            self.models.primary.model,
            self.models.primary.is_configured(),
            self.models.secondary.name,
            self.models.secondary.model,
            self.models.secondary.is_configured(),
        )
    }
}

impl AppConfig {
    /// Load `config.toml` from `APP_DIR` (or the workspace `config/` directory),
    /// layered with `LABELER__SECTION__KEY` environment variables.
    pub fn load() -> AppResult<Self> {
        let root = env::var("APP_DIR").unwrap_or_else(|_| {
            let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
            let dir = manifest_dir.parent().unwrap_or(manifest_dir);
            format!("{}/config", dir.display())
        });
        let path = format!("{root}/config.toml");

        let config = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::with_prefix("LABELER").separator("__"))
            .build()?;

        Self::from_config(config)
    }

    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        Self::from_config(config)
    }

    fn from_config(config: Config) -> AppResult<Self> {
        let mut cfg: AppConfig = config.try_deserialize()?;
        cfg.models.primary.resolve_api_key();
        cfg.models.secondary.resolve_api_key();
        if cfg.gmail.access_token.is_none() {
            cfg.gmail.access_token = env::var("GMAIL_ACCESS_TOKEN").ok();
        }
        cfg.validate()?;

        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        let checks = [
            (self.pipeline.max_results == 0, "pipeline.max_results must be > 0"),
            (
                self.pipeline.classify_concurrency == 0,
                "pipeline.classify_concurrency must be > 0",
            ),
            (self.fetch.batch_size == 0, "fetch.batch_size must be > 0"),
            (self.fetch.page_size == 0, "fetch.page_size must be > 0"),
            (self.apply.batch_size == 0, "apply.batch_size must be > 0"),
            (self.apply.max_retries == 0, "apply.max_retries must be > 0"),
            (
                self.apply.retry_max_delay_ms < self.apply.retry_base_delay_ms,
                "apply.retry_max_delay_ms must be >= apply.retry_base_delay_ms",
            ),
            (self.labels.prefix.trim().is_empty(), "labels.prefix must not be empty"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(AppError::Config(message.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();

        assert_eq!(cfg.pipeline.ai_model, AiModel::Auto);
        assert_eq!(cfg.fetch.batch_size, 10);
        assert_eq!(cfg.apply.batch_size, 50);
        assert_eq!(cfg.apply.batch_delay_ms, 200);
        assert_eq!(cfg.apply.max_retries, 3);
        assert_eq!(cfg.labels.prefix, "AI");
        assert_eq!(cfg.models.primary.name, "mistral");
        assert_eq!(cfg.models.secondary.name, "groq");
    }

    #[test]
    fn test_overrides_and_aliases() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [pipeline]
            query = "from:billing@example.com"
            ai_model = "groq"
            apply_labels = false

            [apply]
            batch_size = 5

            [labels]
            prefix = "Triage"
            colors = { finance = "teal" }
            "#,
        )
        .unwrap();

        assert_eq!(cfg.pipeline.query, "from:billing@example.com");
        assert_eq!(cfg.pipeline.ai_model, AiModel::Secondary);
        assert!(!cfg.pipeline.apply_labels);
        assert_eq!(cfg.apply.batch_size, 5);
        assert_eq!(cfg.apply.max_retries, 3);
        assert_eq!(cfg.labels.prefix, "Triage");
        assert_eq!(cfg.labels.colors.get("finance").map(String::as_str), Some("teal"));
    }

    #[test]
    fn test_inline_api_key_is_configured() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [models.primary]
            name = "mistral"
            endpoint = "http://localhost:9999/v1/chat/completions"
            model = "test-model"
            api_key = "secret"
            "#,
        )
        .unwrap();

        assert!(cfg.models.primary.is_configured());
        assert_eq!(cfg.models.primary.prompt_limits.rate_limit_per_sec, 5);
    }

    #[test]
    fn test_partial_provider_sections_keep_stage_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [models.primary]
            api_key = "primary-secret"

            [models.secondary]
            model = "llama-3.3-70b-versatile"

            [models.secondary.prompt_limits]
            rate_limit_per_sec = 2
            "#,
        )
        .unwrap();

        let primary = &cfg.models.primary;
        assert!(primary.is_configured());
        assert_eq!(primary.name, "mistral");
        assert_eq!(primary.endpoint, ProviderConfig::mistral().endpoint);
        assert_eq!(primary.model, "mistral-small-latest");

        let secondary = &cfg.models.secondary;
        assert_eq!(secondary.name, "groq");
        assert_eq!(secondary.endpoint, ProviderConfig::groq().endpoint);
        assert_eq!(secondary.model, "llama-3.3-70b-versatile");
        assert_eq!(secondary.prompt_limits.rate_limit_per_sec, 2);
        assert_eq!(secondary.prompt_limits.refill_amount, 5);
        assert_eq!(cfg.models.max_body_chars, 4_000);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = AppConfig::from_toml_str("[apply]\nbatch_size = 0").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut cfg = AppConfig::default();
        cfg.apply.max_retries = 0;
        assert!(cfg.validate().is_err());
    }
}
