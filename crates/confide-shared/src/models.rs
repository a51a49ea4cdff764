//! Row models owned by the backend's relational tables.
//!
//! The backend is the source of truth for all of these; clients only hold
//! locally merged caches. Field names serialize as camelCase to match the
//! backend's JSON row payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConversationKey, MessageId, MessageKind, NotificationId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A direct or community chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    /// Public URL of the attached media, for non-text kinds.
    pub media_url: Option<String>,
    /// Duration of audio/video media, in seconds.
    pub media_duration_secs: Option<u32>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reply_to: Option<MessageId>,
}

impl Message {
    /// Build a new outgoing text message.
    pub fn text(sender: UserId, receiver: UserId, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            sender_id: sender,
            receiver_id: receiver,
            content: content.into(),
            kind: MessageKind::Text,
            media_url: None,
            media_duration_secs: None,
            is_read: false,
            read_at: None,
            created_at: now,
            updated_at: now,
            reply_to: None,
        }
    }

    /// Build a new outgoing media message pointing at an uploaded blob.
    pub fn media(
        sender: UserId,
        receiver: UserId,
        kind: MessageKind,
        media_url: impl Into<String>,
        duration_secs: Option<u32>,
    ) -> Self {
        let mut msg = Self::text(sender, receiver, String::new());
        msg.kind = kind;
        msg.media_url = Some(media_url.into());
        msg.media_duration_secs = duration_secs;
        msg
    }

    /// The conversation this message belongs to.
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id, self.receiver_id)
    }
}

// ---------------------------------------------------------------------------
// Read receipt (community variant)
// ---------------------------------------------------------------------------

/// An upsert-only record: `user_id` has read `message_id`. The read count
/// of a community message is the number of receipt rows for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

impl ReadReceipt {
    pub fn new(message_id: MessageId, user_id: UserId) -> Self {
        Self {
            message_id,
            user_id,
            read_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A persisted notification event. The core only consumes inserts to drive
/// toast/native dispatch; the row itself is owned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    /// Event kind tag, e.g. "reaction", "comment", "follow", "message",
    /// "mention", "community_mention", "reply", "verification". Unknown
    /// tags are dispatched with a generic title.
    pub kind: String,
    pub content: String,
    /// Id of the related resource (confession, sender, community), when any.
    pub related_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        kind: impl Into<String>,
        content: impl Into<String>,
        related_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            kind: kind.into(),
            content: content.into(),
            related_id,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}
