//! Gmail API quota costs.
//!
//! Units are taken from the per-method usage table in the Gmail API docs.
//! A single user may spend at most [`GMAIL_QUOTA_PER_SECOND`] units per second.

pub const GMAIL_QUOTA_PER_SECOND: usize = 250;

#[derive(Debug, Clone, Copy)]
pub struct GmailApiQuota {
    pub messages_list: usize,
    pub messages_get: usize,
    pub messages_modify: usize,
    pub labels_list: usize,
    pub labels_create: usize,
    pub labels_get: usize,
}

pub const GMAIL_API_QUOTA: GmailApiQuota = GmailApiQuota {
    messages_list: 5,
    messages_get: 5,
    messages_modify: 5,
    labels_list: 1,
    labels_create: 5,
    labels_get: 1,
};
