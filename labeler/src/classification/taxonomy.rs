use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

/// The closed set of categories a message can be classified into.
///
/// `Uncategorized` is the terminal catch-all and is never offered to a model.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    AsRefStr,
    strum::Display,
)]
pub enum Category {
    Personal,
    Work,
    Promotional,
    Social,
    Notification,
    Finance,
    Career,
    Urgent,
    Uncategorized,
}

impl Category {
    /// Categories a classifier may choose from, catch-all excluded.
    pub fn taxonomy() -> impl Iterator<Item = Category> {
        Category::iter().filter(|c| !c.is_catch_all())
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, Category::Uncategorized)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Category::Personal => "Messages from friends or family, personal plans, one-to-one conversations not about work",
            Category::Work => "Colleagues, clients, meetings, projects, reports, internal tooling and work coordination",
            Category::Promotional => "Marketing, sales, discounts, coupons, newsletters selling a product",
            Category::Social => "Social networks and communities: mentions, comments, friend requests, followers",
            Category::Notification => "Automated notices: account alerts, verification codes, shipping updates, system messages",
            Category::Finance => "Invoices, receipts, bank statements, payments, refunds, billing and taxes",
            Category::Career => "Job applications, recruiters, interviews, offers and professional networking",
            Category::Urgent => "Time-critical requests that need a reply or action soon, deadlines, overdue items",
            Category::Uncategorized => "Nothing above fits",
        }
    }

    /// Semantic color wanted for this category's label, resolved against the provider palette.
    pub fn desired_color(&self) -> &'static str {
        match self {
            Category::Personal => "green",
            Category::Work => "blue",
            Category::Promotional => "yellow",
            Category::Social => "purple",
            Category::Notification => "gray",
            Category::Finance => "teal",
            Category::Career => "amber",
            Category::Urgent => "red",
            Category::Uncategorized => "white",
        }
    }

    /// Lenient match for model output: case-insensitive, tolerant of common synonyms.
    pub fn parse(value: &str) -> Option<Category> {
        let normalized = value.trim().to_lowercase().replace(['_', '-'], " ");
        let normalized = normalized.trim_end_matches('s');
        let category = match normalized {
            "personal" => Category::Personal,
            "work" => Category::Work,
            "promotional" | "promotion" | "marketing" | "advertisement" => Category::Promotional,
            "social" | "social media" => Category::Social,
            "notification" | "update" | "alert" => Category::Notification,
            "finance" | "financial" | "finances" => Category::Finance,
            "career" | "job" | "recruiting" => Category::Career,
            "urgent" | "follow up" | "urgent/follow up" | "urgent / follow up" => Category::Urgent,
            "uncategorized" | "unknown" | "other" => Category::Uncategorized,
            _ => return None,
        };
        Some(category)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Priority> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" | "normal" => Some(Priority::Medium),
            "high" | "urgent" => Some(Priority::High),
            _ => None,
        }
    }
}

/// The link of the fallback chain that produced a result.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderStage {
    Primary,
    Secondary,
    RuleBased,
    /// No stage produced a result and fallback was disabled
    CatchAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    /// >= 0.8, decisive
    High,
    /// 0.5 - 0.8, ambiguous
    Medium,
    /// < 0.5, only the rule-based catch-all lands here
    Low,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.8 {
            ConfidenceBand::High
        } else if confidence >= 0.5 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub category: Category,
    pub confidence: f32,
    pub sentiment: f32,
    pub priority: Priority,
    pub needs_follow_up: bool,
    pub follow_up_suggestion: String,
    pub suggested_response: String,
    pub reasoning: String,
    pub provider: ProviderStage,
}

impl ClassificationResult {
    pub fn catch_all(reasoning: impl Into<String>) -> Self {
        Self {
            category: Category::Uncategorized,
            confidence: 0.0,
            sentiment: 0.0,
            priority: Priority::Low,
            needs_follow_up: false,
            follow_up_suggestion: String::new(),
            suggested_response: String::new(),
            reasoning: reasoning.into(),
            provider: ProviderStage::CatchAll,
        }
    }

    pub fn confidence_band(&self) -> ConfidenceBand {
        ConfidenceBand::from_confidence(self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_has_eight_categories() {
        let categories = Category::taxonomy().collect::<Vec<_>>();
        assert_eq!(categories.len(), 8);
        assert!(!categories.contains(&Category::Uncategorized));
    }

    #[test]
    fn test_parse_category() {
        assert_eq!(Category::parse("Finance"), Some(Category::Finance));
        assert_eq!(Category::parse("  work "), Some(Category::Work));
        assert_eq!(Category::parse("PROMOTIONS"), Some(Category::Promotional));
        assert_eq!(Category::parse("Urgent/Follow-up"), Some(Category::Urgent));
        assert_eq!(Category::parse("follow_up"), Some(Category::Urgent));
        assert_eq!(Category::parse("notifications"), Some(Category::Notification));
        assert_eq!(Category::parse("Unknown"), Some(Category::Uncategorized));
        assert_eq!(Category::parse("Recipes"), None);
        assert_eq!(Category::parse(""), None);
    }

    #[test]
    fn test_every_category_round_trips_through_parse() {
        for category in Category::iter() {
            assert_eq!(Category::parse(category.as_ref()), Some(category));
        }
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(ConfidenceBand::from_confidence(0.95), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_confidence(0.8), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_confidence(0.79), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_confidence(0.5), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_confidence(0.3), ConfidenceBand::Low);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(ProviderStage::RuleBased.to_string(), "rule_based");
        assert_eq!(ProviderStage::CatchAll.to_string(), "catch_all");
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse("normal"), Some(Priority::Medium));
        assert_eq!(Priority::parse("whenever"), None);
    }
}
