//! Wire types for `users.messages.get`.
//!
//! Body data is kept as the base64url string Gmail sends so the caller decides
//! when (and whether) to decode it.

use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use serde::{Deserialize, Serialize};

/// Format parameter for Gmail API message requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageFormat {
    /// Full message data with the body content parsed into parts
    #[default]
    Full,
    /// Only the message ids and labels
    Minimal,
    /// Headers without body
    Metadata,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Full => "full",
            MessageFormat::Minimal => "minimal",
            MessageFormat::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    /// Milliseconds since epoch, sent by Gmail as a string
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

impl GmailMessage {
    pub fn internal_date_ms(&self) -> Option<i64> {
        self.internal_date.as_deref().and_then(|d| d.parse().ok())
    }

    /// Case-insensitive lookup of a top-level header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.header(name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub part_id: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    #[serde(default)]
    pub body: Option<MessagePartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn is_mime(&self, mime_type: &str) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(mime_type))
    }

    /// Decoded body data of this part only (children are not visited).
    pub fn decoded_data(&self) -> Option<String> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .and_then(decode_base64_url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePartBody {
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub attachment_id: Option<String>,
}

/// Decode a base64url payload, padded or not. Invalid UTF-8 is replaced lossily.
pub fn decode_base64_url(data: &str) -> Option<String> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(trimmed))
        .ok()?;

    Some(String::from_utf8_lossy(&bytes).into_owned())
}
