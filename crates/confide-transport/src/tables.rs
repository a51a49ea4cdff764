//! Typed row-store contracts.
//!
//! Each feed's row shape is modeled as an explicit record type and the
//! reshape happens once inside the adapter, so consumers never handle
//! loosely typed rows. Every operation is a suspension point; failures
//! are transient by taxonomy and surfaced for caller-driven retry.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use confide_shared::{ConversationKey, Message, MessageId, Notification, TransportError, UserId};

/// CRUD surface of the messages table.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` most recent messages of a conversation, returned in
    /// ascending creation order.
    async fn fetch_conversation(
        &self,
        key: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<Message>, TransportError>;

    /// Every unread message addressed to `receiver`. Baseline for the
    /// per-sender unread counters.
    async fn unread_messages(&self, receiver: UserId) -> Result<Vec<Message>, TransportError>;

    async fn insert(&self, message: Message) -> Result<(), TransportError>;

    /// Replace the stored row with the same id (edits, read flips).
    async fn update(&self, message: Message) -> Result<(), TransportError>;

    async fn delete(&self, id: MessageId) -> Result<(), TransportError>;

    /// Mark every unread message from `sender` to `receiver` as read.
    /// Returns the number of rows flipped.
    async fn mark_read_from(
        &self,
        receiver: UserId,
        sender: UserId,
    ) -> Result<u64, TransportError>;
}

/// Upsert-only read receipts for community messages.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Record that `reader` has read `message_id`. Returns `true` when the
    /// receipt is new; a duplicate mark is a no-op, not an error.
    async fn upsert(&self, message_id: MessageId, reader: UserId)
        -> Result<bool, TransportError>;

    /// Batch variant of [`upsert`](Self::upsert).
    async fn upsert_many(
        &self,
        message_ids: &[MessageId],
        reader: UserId,
    ) -> Result<(), TransportError>;

    /// Reader sets for a window of message ids. Ids with no receipts are
    /// simply absent from the result.
    async fn readers_for(
        &self,
        message_ids: &[MessageId],
    ) -> Result<HashMap<MessageId, HashSet<UserId>>, TransportError>;
}

/// Persisted notification events.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a notification row; its insert event drives dispatch on
    /// the recipient's clients.
    async fn publish(&self, notification: Notification) -> Result<(), TransportError>;

    /// Most recent notifications for a user, newest first.
    async fn for_user(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, TransportError>;
}
