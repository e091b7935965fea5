use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use lib_email_clients::gmail::message::{GmailMessage, MessagePart};
use regex::Regex;
use serde::Serialize;

const RE_WHITESPACE_STR: &str = r"[\r\t\n]+";
const RE_LONG_SPACE_STR: &str = r" {2,}";
const RE_DIVIDERS_STR: &str = r"[-=_]{3,}";
const RE_HTTP_LINK_STR: &str = r"https?:\/\/(www\.)?[-a-zA-Z0-9@:%._\+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b([-a-zA-Z0-9()@:%_\+.~#?&//=]*)";
const RE_EMAIL_ADDRESS_STR: &str = r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}";

lazy_static::lazy_static!(
    static ref RE_WHITESPACE: Regex = Regex::new(RE_WHITESPACE_STR).unwrap();
    static ref RE_LONG_SPACE: Regex = Regex::new(RE_LONG_SPACE_STR).unwrap();
    static ref RE_DIVIDERS: Regex = Regex::new(RE_DIVIDERS_STR).unwrap();
    static ref RE_HTTP_LINK: Regex = Regex::new(RE_HTTP_LINK_STR).unwrap();
    static ref RE_EMAIL_ADDRESS: Regex = Regex::new(RE_EMAIL_ADDRESS_STR).unwrap();
);

const UNREAD_LABEL: &str = "UNREAD";

/// Snapshot of a provider message taken at fetch time.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub body: String,
    pub snippet: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub label_ids: BTreeSet<String>,
}

impl NormalizedMessage {
    pub fn from_gmail_message(msg: &GmailMessage) -> Self {
        let header = |name: &str| msg.header(name).map(str::to_string).unwrap_or_default();
        let snippet = msg.snippet.clone().unwrap_or_default();
        let body = msg
            .payload
            .as_ref()
            .and_then(extract_body)
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| snippet.clone());
        let label_ids = msg.label_ids.iter().cloned().collect::<BTreeSet<_>>();

        NormalizedMessage {
            id: msg.id.clone(),
            thread_id: msg.thread_id.clone().unwrap_or_default(),
            subject: clean_text(&header("Subject")),
            from: header("From"),
            to: split_addresses(&header("To")),
            body,
            snippet,
            timestamp: msg
                .internal_date_ms()
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            is_read: !label_ids.contains(UNREAD_LABEL),
            label_ids,
        }
    }

    /// Domain part of the sender address, lower-cased.
    pub fn sender_domain(&self) -> Option<String> {
        sender_address(&self.from)
            .and_then(|address| address.rsplit_once('@').map(|(_, d)| d.to_lowercase()))
    }
}

impl fmt::Display for NormalizedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<subject>{}</subject> <sender>{}</sender> <body>{}</body>",
            self.subject, self.from, self.body
        )
    }
}

/// First `text/plain` segment, depth first; a `text/html` segment converted to
/// text when no plain part exists.
fn extract_body(payload: &MessagePart) -> Option<String> {
    if let Some(plain) = find_part(payload, "text/plain").and_then(MessagePart::decoded_data) {
        return Some(clean_text(&plain));
    }

    find_part(payload, "text/html")
        .and_then(MessagePart::decoded_data)
        .map(|html| {
            let text = html2text::from_read(html.as_bytes(), 400);
            clean_text(&text)
        })
}

fn find_part<'a>(part: &'a MessagePart, mime_type: &str) -> Option<&'a MessagePart> {
    let is_attachment = part.filename.as_deref().is_some_and(|f| !f.is_empty());
    if part.is_mime(mime_type) && !is_attachment && has_data(part) {
        return Some(part);
    }
    part.parts.iter().find_map(|p| find_part(p, mime_type))
}

fn has_data(part: &MessagePart) -> bool {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .is_some_and(|d| !d.is_empty())
}

fn clean_text(text: &str) -> String {
    let t = RE_HTTP_LINK.replace_all(text, "[LINK]");
    let t = RE_WHITESPACE.replace_all(&t, " ");
    let t = RE_DIVIDERS.replace_all(&t, " ");
    let t = RE_LONG_SPACE.replace_all(&t, " ");
    t.trim().to_string()
}

fn split_addresses(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| sender_address(s).unwrap_or(s).to_string())
        .collect()
}

fn sender_address(from: &str) -> Option<&str> {
    RE_EMAIL_ADDRESS.find(from).map(|m| m.as_str())
}
