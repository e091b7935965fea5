use async_trait::async_trait;
use regex::Regex;

use crate::email::normalized_message::NormalizedMessage;
use crate::error::AppResult;

use super::taxonomy::{Category, ClassificationResult, Priority, ProviderStage};
use super::ClassificationStrategy;

struct Rule {
    category: Category,
    keywords: Regex,
    sender_domains: &'static [&'static str],
    confidence: f32,
    priority: Priority,
}

impl Rule {
    fn new(
        category: Category,
        keywords: &str,
        sender_domains: &'static [&'static str],
        confidence: f32,
        priority: Priority,
    ) -> Self {
        Rule {
            category,
            keywords: Regex::new(keywords).unwrap(),
            sender_domains,
            confidence,
            priority,
        }
    }

    /// Returns what triggered the rule, keyword first.
    fn matches(&self, text: &str, domain: &str) -> Option<String> {
        if let Some(m) = self.keywords.find(text) {
            return Some(format!("keyword \"{}\"", m.as_str().trim()));
        }
        self.sender_domains
            .iter()
            .find(|d| domain == **d || domain.ends_with(&format!(".{d}")))
            .map(|d| format!("sender domain {d}"))
    }
}

lazy_static::lazy_static!(
    /// Evaluated in order; the first matching rule wins.
    static ref RULES: Vec<Rule> = vec![
        Rule::new(
            Category::Urgent,
            r"\b(?:urgent|asap|immediately|action required|deadline|overdue|final notice)\b",
            &[],
            0.85,
            Priority::High,
        ),
        Rule::new(
            Category::Finance,
            r"\b(?:invoice|receipt|payment|bank|statement|refund|billing)s?\b",
            &["paypal.com", "stripe.com"],
            0.8,
            Priority::Medium,
        ),
        Rule::new(
            Category::Career,
            r"\b(?:job|interview|resume|hiring|recruiter|offer letter)s?\b",
            &["greenhouse.io", "lever.co", "indeed.com"],
            0.75,
            Priority::Medium,
        ),
        Rule::new(
            Category::Social,
            r"\b(?:mentioned you|friend request|tagged you)\b",
            &[
                "facebookmail.com",
                "facebook.com",
                "twitter.com",
                "x.com",
                "linkedin.com",
                "instagram.com",
                "reddit.com",
            ],
            0.8,
            Priority::Low,
        ),
        Rule::new(
            Category::Promotional,
            r"\b(?:sale|discount|coupon|deal|limited time|unsubscribe)s?\b|\d+\s?% off\b",
            &[],
            0.8,
            Priority::Low,
        ),
        Rule::new(
            Category::Notification,
            r"\b(?:alert|verify|verification|password|security|notification)s?\b|\bno-?reply\b",
            &[],
            0.7,
            Priority::Low,
        ),
        Rule::new(
            Category::Work,
            r"\b(?:meeting|project|agenda|report|team|schedule|review)s?\b",
            &[],
            0.6,
            Priority::Medium,
        ),
        Rule::new(
            Category::Personal,
            r"\b(?:family|dinner|weekend|birthday)s?\b",
            &["gmail.com", "yahoo.com", "outlook.com", "hotmail.com", "icloud.com"],
            0.55,
            Priority::Low,
        ),
    ];

    static ref RE_POSITIVE: Regex =
        Regex::new(r"\b(?:thanks|thank you|great|congratulations|appreciate|love|happy|welcome|excited)\b").unwrap();
    static ref RE_NEGATIVE: Regex =
        Regex::new(r"\b(?:overdue|problem|issue|failed|sorry|unfortunately|complaint|cancel(?:led)?|error)\b").unwrap();
);

const SENTIMENT_STEP: f32 = 0.2;
const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Deterministic keyword and sender-domain heuristics. Never fails, so it
/// terminates the fallback chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn evaluate(&self, message: &NormalizedMessage) -> ClassificationResult {
        let domain = message.sender_domain().unwrap_or_default();
        // sender name and local part stay out of keyword matching
        let text = format!("{} {} {}", message.subject, message.body, domain).to_lowercase();
        let sentiment = sentiment_score(&text);

        let matched = RULES
            .iter()
            .find_map(|rule| rule.matches(&text, &domain).map(|trigger| (rule, trigger)));

        let Some((rule, trigger)) = matched else {
            return ClassificationResult {
                category: Category::Uncategorized,
                confidence: FALLBACK_CONFIDENCE,
                sentiment,
                priority: Priority::Low,
                needs_follow_up: false,
                follow_up_suggestion: String::new(),
                suggested_response: String::new(),
                reasoning: "No rule matched".to_string(),
                provider: ProviderStage::RuleBased,
            };
        };

        let needs_follow_up = match rule.category {
            Category::Urgent => true,
            Category::Work => text.contains("please") || text.contains('?'),
            _ => false,
        };
        let follow_up_suggestion = if needs_follow_up {
            match rule.category {
                Category::Urgent => "Respond or act before the stated deadline".to_string(),
                _ => "Reply to the sender's request".to_string(),
            }
        } else {
            String::new()
        };

        ClassificationResult {
            category: rule.category,
            confidence: rule.confidence,
            sentiment,
            priority: rule.priority,
            needs_follow_up,
            follow_up_suggestion,
            suggested_response: String::new(),
            reasoning: format!("Matched {} rule on {}", rule.category, trigger),
            provider: ProviderStage::RuleBased,
        }
    }
}

fn sentiment_score(text: &str) -> f32 {
    let positive = RE_POSITIVE.find_iter(text).count() as f32;
    let negative = RE_NEGATIVE.find_iter(text).count() as f32;
    ((positive - negative) * SENTIMENT_STEP).clamp(-1.0, 1.0)
}

#[async_trait]
impl ClassificationStrategy for RuleBasedClassifier {
    fn stage(&self) -> ProviderStage {
        ProviderStage::RuleBased
    }

    async fn classify(&self, message: &NormalizedMessage) -> AppResult<ClassificationResult> {
        Ok(self.evaluate(message))
    }
}
