use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use google_gmail1::api::{Label, LabelColor};
use lib_email_clients::gmail::message::{GmailMessage, MessageFormat};
use serde_json::json;

use crate::email::normalized_message::NormalizedMessage;
use crate::email::provider::{LabelChange, MailboxProvider, MessageIdPage};
use crate::error::{AppError, AppResult};
use crate::prompt::ChatCompletion;

pub fn message_with(id: &str, subject: &str, from: &str, body: &str) -> NormalizedMessage {
    NormalizedMessage {
        id: id.to_string(),
        thread_id: format!("thread-{id}"),
        subject: subject.to_string(),
        from: from.to_string(),
        body: body.to_string(),
        ..Default::default()
    }
}

/// A `full` format Gmail message with a single `text/plain` part.
pub fn gmail_message(id: &str, subject: &str, from: &str, body: &str) -> GmailMessage {
    serde_json::from_value(json!({
        "id": id,
        "threadId": format!("thread-{id}"),
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": body.chars().take(100).collect::<String>(),
        "internalDate": "1727089470000",
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                {"name": "Subject", "value": subject},
                {"name": "From", "value": from},
                {"name": "To", "value": "me@example.com"}
            ],
            "body": {"data": URL_SAFE_NO_PAD.encode(body)}
        }
    }))
    .unwrap()
}

#[derive(Default)]
struct MailboxState {
    messages: Vec<GmailMessage>,
    labels: Vec<Label>,
    created: Vec<String>,
    queries: Vec<String>,
    next_label_id: usize,
    list_labels_error: Option<AppError>,
    failing_creations: HashSet<String>,
    /// label name -> remaining 503 responses
    throttled_creations: HashMap<String, usize>,
    failing_gets: HashSet<String>,
    /// message id -> remaining 429 responses
    throttled_gets: HashMap<String, usize>,
    get_calls: HashMap<String, usize>,
    list_calls: usize,
    /// (first failing list call, remaining failures)
    list_failure: Option<(usize, usize)>,
    /// message id -> (remaining failures, transient)
    failing_modifies: HashMap<String, (usize, bool)>,
    /// Modifications accepted but never applied
    dropped_modifies: HashSet<String>,
    modify_calls: HashMap<String, usize>,
    list_labels_calls: usize,
    create_label_calls: usize,
}

/// In-memory mailbox with failure injection and call counters.
#[derive(Default)]
pub struct MockMailbox {
    state: Mutex<MailboxState>,
}

impl MockMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<GmailMessage>) -> Self {
        let mailbox = Self::new();
        mailbox.state.lock().unwrap().messages = messages;
        mailbox
    }

    pub fn add_label(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_label_id += 1;
        let id = format!("Label_{}", state.next_label_id);
        state.labels.push(Label {
            id: Some(id.clone()),
            name: Some(name.to_string()),
            type_: Some("user".to_string()),
            ..Default::default()
        });
        id
    }

    pub fn labels(&self) -> Vec<Label> {
        self.state.lock().unwrap().labels.clone()
    }

    pub fn created_labels(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn label_id(&self, name: &str) -> Option<String> {
        self.labels()
            .into_iter()
            .find(|l| l.name.as_deref() == Some(name))
            .and_then(|l| l.id)
    }

    pub fn message_labels(&self, id: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.label_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn get_calls(&self, id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .get_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn list_labels_calls(&self) -> usize {
        self.state.lock().unwrap().list_labels_calls
    }

    pub fn create_label_calls(&self) -> usize {
        self.state.lock().unwrap().create_label_calls
    }

    pub fn modify_calls(&self, id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .modify_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_modify_calls(&self) -> usize {
        self.state.lock().unwrap().modify_calls.values().sum()
    }

    pub fn fail_list_labels(&self, error: AppError) {
        self.state.lock().unwrap().list_labels_error = Some(error);
    }

    pub fn fail_label_creation(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_creations
            .insert(name.to_string());
    }

    /// Answer the next `times` creations of a label with a 503.
    pub fn throttle_label_creation(&self, name: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .throttled_creations
            .insert(name.to_string(), times);
    }

    pub fn fail_get(&self, id: &str) {
        self.state.lock().unwrap().failing_gets.insert(id.to_string());
    }

    /// Answer the next `times` detail fetches of a message with a 429.
    pub fn throttle_get(&self, id: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .throttled_gets
            .insert(id.to_string(), times);
    }

    /// Answer `times` id listings with a 429, starting at the `from_call`-th call (1-based).
    pub fn throttle_listing(&self, from_call: usize, times: usize) {
        self.state.lock().unwrap().list_failure = Some((from_call, times));
    }

    /// Fail the next `times` modifications of a message with a 503.
    pub fn fail_modify_transient(&self, id: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_modifies
            .insert(id.to_string(), (times, true));
    }

    /// Reject every modification of a message with a 400.
    pub fn fail_modify_permanent(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_modifies
            .insert(id.to_string(), (usize::MAX, false));
    }

    pub fn drop_modifications(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .dropped_modifies
            .insert(id.to_string());
    }
}

#[async_trait]
impl MailboxProvider for MockMailbox {
    async fn list_message_ids(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> AppResult<MessageIdPage> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.to_string());
        state.list_calls += 1;
        let call = state.list_calls;
        if let Some((from_call, remaining)) = state.list_failure.as_mut() {
            if call >= *from_call && *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::TooManyRequests);
            }
        }

        let start = page_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + max_results as usize).min(state.messages.len());
        let ids = state.messages[start.min(end)..end]
            .iter()
            .map(|m| m.id.clone())
            .collect();
        let next_page_token = (end < state.messages.len()).then(|| end.to_string());

        Ok(MessageIdPage {
            ids,
            next_page_token,
        })
    }

    async fn get_message(&self, id: &str, format: MessageFormat) -> AppResult<GmailMessage> {
        let mut state = self.state.lock().unwrap();
        *state.get_calls.entry(id.to_string()).or_default() += 1;
        if let Some(remaining) = state.throttled_gets.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::TooManyRequests);
            }
        }
        if state.failing_gets.contains(id) {
            return Err(AppError::Upstream {
                status: 500,
                message: format!("Backend error fetching {id}"),
            });
        }

        let message = state
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Message {id}")))?;

        Ok(match format {
            MessageFormat::Minimal => GmailMessage {
                payload: None,
                ..message
            },
            _ => message,
        })
    }

    async fn list_labels(&self) -> AppResult<Vec<Label>> {
        let mut state = self.state.lock().unwrap();
        state.list_labels_calls += 1;
        if let Some(error) = state.list_labels_error.take() {
            return Err(error);
        }
        Ok(state.labels.clone())
    }

    async fn create_label(&self, name: &str, color: LabelColor) -> AppResult<String> {
        let mut state = self.state.lock().unwrap();
        state.create_label_calls += 1;
        if let Some(remaining) = state.throttled_creations.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::Upstream {
                    status: 503,
                    message: "Backend unavailable".to_string(),
                });
            }
        }
        if state.failing_creations.contains(name) {
            return Err(AppError::BadRequest(format!("Invalid label name {name}")));
        }
        if state.labels.iter().any(|l| l.name.as_deref() == Some(name)) {
            return Err(AppError::Conflict(format!("Label {name} exists")));
        }

        state.next_label_id += 1;
        let id = format!("Label_{}", state.next_label_id);
        state.labels.push(Label {
            id: Some(id.clone()),
            name: Some(name.to_string()),
            type_: Some("user".to_string()),
            color: Some(color),
            ..Default::default()
        });
        state.created.push(name.to_string());
        Ok(id)
    }

    async fn modify_message_labels(&self, id: &str, change: &LabelChange) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        *state.modify_calls.entry(id.to_string()).or_default() += 1;

        if let Some((remaining, transient)) = state.failing_modifies.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(if *transient {
                    AppError::Upstream {
                        status: 503,
                        message: "Backend unavailable".to_string(),
                    }
                } else {
                    AppError::BadRequest(format!("Invalid modification of {id}"))
                });
            }
        }
        if state.dropped_modifies.contains(id) {
            return Ok(());
        }

        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Message {id}")))?;
        message
            .label_ids
            .retain(|l| !change.remove_label_ids.contains(l));
        for label in &change.add_label_ids {
            if !message.label_ids.contains(label) {
                message.label_ids.push(label.clone());
            }
        }
        Ok(())
    }
}

type Responder = Box<dyn Fn(&str) -> AppResult<String> + Send + Sync>;

/// Chat backend answering from a closure over the user prompt.
pub struct ScriptedChat {
    name: String,
    responder: Responder,
    calls: AtomicUsize,
    last_user_prompt: Mutex<Option<String>>,
}

impl ScriptedChat {
    pub fn new(
        name: &str,
        responder: impl Fn(&str) -> AppResult<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            last_user_prompt: Mutex::new(None),
        })
    }

    pub fn always(name: &str, content: &str) -> Arc<Self> {
        let content = content.to_string();
        Self::new(name, move |_| Ok(content.clone()))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::new(name, |_| Err(AppError::Transport("connection reset".to_string())))
    }

    /// Answers `content` when the prompt contains `needle`, fails otherwise.
    pub fn matching(name: &str, needle: &str, content: &str) -> Arc<Self> {
        let needle = needle.to_string();
        let content = content.to_string();
        Self::new(name, move |prompt| {
            if prompt.contains(&needle) {
                Ok(content.clone())
            } else {
                Err(AppError::Upstream {
                    status: 500,
                    message: "model overloaded".to_string(),
                })
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_user_prompt(&self) -> Option<String> {
        self.last_user_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _system: &str, user: &str) -> AppResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_user_prompt.lock().unwrap() = Some(user.to_string());
        (self.responder)(user)
    }
}
