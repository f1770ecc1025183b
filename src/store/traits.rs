//! `UnsubscribeStore` trait: the persistence collaborator for resolution.
//!
//! The orchestrator needs three things from storage: read a message (and
//! any extraction already cached on it), append attempt records, and flip a
//! message's status. Everything else here serves import and inspection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::unsubscribe::types::{AttemptRecord, UnsubscribeLinks};

/// Status of a tracked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Not yet acted on.
    Pending,
    /// Unsubscribe confirmed.
    Unsubscribed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Unsubscribed => "unsubscribed",
        }
    }

    /// Parse a DB string; unknown values read as `Pending`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "unsubscribed" => Self::Unsubscribed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted message as the resolver sees it.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub user_id: String,
    pub sender: String,
    pub subject: Option<String>,
    /// Recipient address, used when a page asks for the subscriber's email.
    pub user_email: Option<String>,
    pub list_unsubscribe: Option<String>,
    pub list_unsubscribe_post: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Cached extraction, raw JSON as stored.
    pub unsubscribe_links: Option<String>,
    pub status: MessageStatus,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Decode the cached extraction. Malformed JSON reads as absent.
    pub fn stored_links(&self) -> Option<UnsubscribeLinks> {
        let raw = self.unsubscribe_links.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(links) => Some(links),
            Err(e) => {
                tracing::warn!(id = %self.id, "Ignoring malformed stored extraction: {e}");
                None
            }
        }
    }
}

/// Fields for a new message.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub user_id: String,
    pub sender: String,
    pub subject: Option<String>,
    pub user_email: Option<String>,
    pub list_unsubscribe: Option<String>,
    pub list_unsubscribe_post: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic persistence for messages and the attempt audit log.
#[async_trait]
pub trait UnsubscribeStore: Send + Sync {
    // ── Messages ────────────────────────────────────────────────────

    /// Insert a new message. Returns the generated id.
    async fn insert_message(&self, message: &NewMessage) -> Result<String, DatabaseError>;

    /// Get a message by id.
    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, DatabaseError>;

    /// All messages owned by `user_id`, most recent first.
    async fn list_messages_for_user(&self, user_id: &str) -> Result<Vec<StoredMessage>, DatabaseError>;

    /// Update a message's status. `NotFound` if the id is unknown.
    async fn update_message_status(&self, id: &str, status: MessageStatus) -> Result<(), DatabaseError>;

    // ── Extraction cache ────────────────────────────────────────────

    /// The extraction cached on a message, if present and well-formed.
    async fn get_stored_links(&self, id: &str) -> Result<Option<UnsubscribeLinks>, DatabaseError> {
        Ok(self.get_message(id).await?.and_then(|m| m.stored_links()))
    }

    /// Cache an extraction on a message.
    async fn save_links(&self, id: &str, links: &UnsubscribeLinks) -> Result<(), DatabaseError>;

    // ── Attempts (append-only) ──────────────────────────────────────

    /// Append an attempt record.
    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), DatabaseError>;

    /// Attempts for a message, oldest first.
    async fn list_attempts(&self, message_id: &str) -> Result<Vec<AttemptRecord>, DatabaseError>;
}
