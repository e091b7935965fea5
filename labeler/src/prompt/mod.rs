pub mod chat;

use indoc::{formatdoc, indoc};
use serde::{Deserialize, Serialize};

use crate::classification::taxonomy::{Category, Priority};
use crate::error::{AppError, AppResult};

pub use chat::{ChatCompletion, ChatCompletionClient};

/// Structured answer expected from a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnswer {
    pub category: Category,
    pub confidence: f32,
    pub sentiment: f32,
    pub priority: Priority,
    pub needs_follow_up: bool,
    pub follow_up_suggestion: String,
    pub suggested_response: String,
    pub reasoning: String,
}

/// Parse the model's JSON content. Anything other than a JSON object with a
/// taxonomy `category` is an error; nothing is recovered from free text.
pub fn parse_category_answer(content: &str) -> AppResult<ParsedAnswer> {
    let parsed: serde_json::Value = serde_json::from_str(content.trim())
        .map_err(|e| AppError::InvalidResponse(format!("Response is not JSON: {e}")))?;
    let object = parsed
        .as_object()
        .ok_or_else(|| AppError::InvalidResponse("Response is not a JSON object".to_string()))?;

    let field = |camel: &str, snake: &str| object.get(camel).or_else(|| object.get(snake));
    let text = |camel: &str, snake: &str| {
        field(camel, snake)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let raw_category = object
        .get("category")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::InvalidResponse("Missing category".to_string()))?;
    // the catch-all is never a model answer
    let category = Category::parse(raw_category)
        .filter(|c| !c.is_catch_all())
        .ok_or_else(|| {
            AppError::InvalidResponse(format!("Category outside taxonomy: {raw_category}"))
        })?;

    let confidence = object
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0) as f32;
    let sentiment = object
        .get("sentiment")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
        .clamp(-1.0, 1.0) as f32;
    let priority = object
        .get("priority")
        .and_then(|v| v.as_str())
        .and_then(Priority::parse)
        .unwrap_or_default();
    let needs_follow_up = field("needsFollowUp", "needs_follow_up")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(ParsedAnswer {
        category,
        confidence,
        sentiment,
        priority,
        needs_follow_up,
        follow_up_suggestion: text("followUpSuggestion", "follow_up_suggestion"),
        suggested_response: text("suggestedResponse", "suggested_response"),
        reasoning: text("reasoning", "reasoning"),
    })
}

const CLASSIFICATION_INSTRUCTIONS: &str = indoc! {r#"
    Read the email content carefully (subject, sender, body).
    Determine the sender's intent, not the user's reaction.
    Choose the single best category from the taxonomy.
    If multiple categories apply, choose the dominant intent.
    Do not invent new categories."#
};

pub fn system_prompt() -> String {
    let taxonomy = Category::taxonomy()
        .map(|c| format!("• \"{}\": {}", c.as_ref(), c.description()))
        .collect::<Vec<_>>()
        .join("\n");

    formatdoc! {r#"
        You are an email classification engine.
        Your task is to categorize the given email into exactly one category from the taxonomy below.

        Instructions:
        {CLASSIFICATION_INSTRUCTIONS}

        Taxonomy (authoritative):

        {taxonomy}

        You will only respond with a JSON object with the keys category, confidence, sentiment, needsFollowUp, followUpSuggestion, suggestedResponse, priority, reasoning.
        "category" is one of the taxonomy names above.
        "confidence" is a float between 0 and 1 representing classification certainty.
        "sentiment" is a float between -1 (negative) and 1 (positive).
        "priority" is one of "low", "medium", "high".
        "needsFollowUp" is a boolean; "followUpSuggestion" and "suggestedResponse" may be empty strings.
        "reasoning" is one short sentence."#
    }
}

/// Build the user prompt for one email. The body is cut to `max_body_chars`.
pub fn categorization_user_prompt(
    subject: &str,
    sender: &str,
    body: &str,
    max_body_chars: usize,
) -> String {
    let body = truncate_chars(body, max_body_chars);
    formatdoc!(
        r#"Categorize the following email based on subject, sender, and body.

            <subject>{}</subject>
            <sender>{}</sender>
            <body>{}</body>"#,
        subject,
        sender,
        body
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ModelLength,
    Error,
    ToolCalls,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<PromptUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
    /// OpenAI-compatible providers nest the error object
    NestedError { error: ChatApiError },
}
