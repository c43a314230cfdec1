use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Transport Events ---

/// One new-message event from the transport's live feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub chat_id: i64,
    pub message_id: i64,
    /// Body text. `None` for media-only messages; such messages never match.
    pub text: Option<String>,
    /// Sender display name, when the transport knows it.
    pub sender: Option<String>,
    pub sent_at: DateTime<Utc>,
}

// --- Registry Rows ---

/// A subscriber account as stored in the registry. The engine treats it as
/// an opaque delivery target; only the command collaborator reads metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub subscriber_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A monitored chat stream. Stored once no matter how many requests bind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub chat_id: i64,
    /// Public handle without the leading `@`, when the chat has one.
    pub handle: Option<String>,
    pub title: Option<String>,
}

/// One active search request with everything the subscription index needs,
/// as returned by the registry's snapshot read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub request_id: i64,
    pub subscriber_id: i64,
    pub title: Option<String>,
    /// Normalized keywords. May be empty, which makes the request inert.
    pub keywords: Vec<String>,
    pub chats: Vec<ChatInfo>,
}

/// Summary row for the command collaborator's "my requests" view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: i64,
    pub title: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub keyword_count: i64,
    pub chat_count: i64,
}

// --- Keyword Normalization ---

/// Trim and lowercase a raw keyword. Returns `None` when nothing is left,
/// so empty strings never reach storage or the matcher.
pub fn normalize_keyword(raw: &str) -> Option<String> {
    let cleaned = raw.trim().to_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

// --- Chat Id / Link Helpers ---

/// Supergroups and channels carry a `-100` marker prefix on their ids.
pub const SUPERGROUP_MARKER: i64 = -1_000_000_000_000;

/// Convert a raw positive channel id to the `-100`-prefixed form the
/// transport reports for supergroups.
pub fn supergroup_form(raw_id: i64) -> i64 {
    SUPERGROUP_MARKER - raw_id
}

/// Canonical link to a message: the public `t.me/<handle>/<id>` form when
/// the chat has a handle, the internal `t.me/c/<id>/<id>` form for private
/// supergroups, `None` for plain groups that have neither.
pub fn message_link(chat: &ChatInfo, message_id: i64) -> Option<String> {
    if let Some(handle) = chat.handle.as_deref() {
        return Some(format!("https://t.me/{handle}/{message_id}"));
    }
    if chat.chat_id < SUPERGROUP_MARKER {
        let internal = -chat.chat_id + SUPERGROUP_MARKER;
        return Some(format!("https://t.me/c/{internal}/{message_id}"));
    }
    None
}
