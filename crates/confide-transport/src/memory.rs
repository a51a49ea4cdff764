//! In-process implementation of the whole transport contract.
//!
//! Tables live in mutex-guarded vectors; every mutation fans its change
//! event out to the matching feed. Broadcast and presence channels reuse
//! the shared registries from [`crate::broadcast`] and [`crate::presence`].
//!
//! This backend is the test double for all engines and works as an
//! offline/single-process backend. Subscriptions spawn a forwarding task,
//! so a tokio runtime must be running.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use confide_shared::constants::FEED_CHANNEL_CAPACITY;
use confide_shared::{
    ConversationKey, Message, MessageId, Notification, ReadReceipt, TransportError, UserId,
};

use crate::broadcast::{BroadcastChannel, ChannelRegistry};
use crate::feed::{ChangeEvent, FeedSubscription};
use crate::presence::{PresenceChannel, RoomRegistry};
use crate::storage::FileStorage;
use crate::tables::{MessageStore, NotificationStore, ReceiptStore};

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

struct MemoryInner {
    messages: Mutex<Vec<Message>>,
    message_feed: broadcast::Sender<ChangeEvent<Message>>,

    receipts: Mutex<Vec<ReadReceipt>>,
    receipt_feed: broadcast::Sender<ChangeEvent<ReadReceipt>>,

    notifications: Mutex<Vec<Notification>>,
    notification_feed: broadcast::Sender<ChangeEvent<Notification>>,

    channels: ChannelRegistry,
    rooms: RoomRegistry,

    files: Mutex<HashMap<(String, String), StoredObject>>,
}

/// Handle to one in-memory backend. Clones share the same tables,
/// feeds and channels.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                messages: Mutex::new(Vec::new()),
                message_feed: broadcast::channel(FEED_CHANNEL_CAPACITY).0,
                receipts: Mutex::new(Vec::new()),
                receipt_feed: broadcast::channel(FEED_CHANNEL_CAPACITY).0,
                notifications: Mutex::new(Vec::new()),
                notification_feed: broadcast::channel(FEED_CHANNEL_CAPACITY).0,
                channels: Arc::new(Mutex::new(HashMap::new())),
                rooms: Arc::new(Mutex::new(HashMap::new())),
                files: Mutex::new(HashMap::new()),
            }),
        }
    }

    // -- subscriptions ------------------------------------------------------

    /// Change feed over the messages table, filtered to rows the predicate
    /// accepts. Dropping the subscription unsubscribes.
    pub fn subscribe_messages<F>(&self, filter: F) -> FeedSubscription<Message>
    where
        F: Fn(&Message) -> bool + Send + 'static,
    {
        forward(&self.inner.message_feed, filter)
    }

    /// Change feed over the read-receipts table.
    pub fn subscribe_receipts<F>(&self, filter: F) -> FeedSubscription<ReadReceipt>
    where
        F: Fn(&ReadReceipt) -> bool + Send + 'static,
    {
        forward(&self.inner.receipt_feed, filter)
    }

    /// Change feed over the notifications table, filtered to one user.
    pub fn subscribe_notifications(&self, user: UserId) -> FeedSubscription<Notification> {
        forward(&self.inner.notification_feed, move |n: &Notification| {
            n.user_id == user
        })
    }

    // -- channels -----------------------------------------------------------

    /// Open a named broadcast channel.
    pub fn broadcast<T: Serialize + DeserializeOwned>(&self, name: &str) -> BroadcastChannel<T> {
        BroadcastChannel::open(&self.inner.channels, name)
    }

    /// Join a named presence channel as `local`.
    pub fn presence(&self, name: &str, local: UserId) -> PresenceChannel {
        PresenceChannel::join(self.inner.rooms.clone(), name, local)
    }

    // -- typed store handles ------------------------------------------------

    pub fn message_store(&self) -> Arc<dyn MessageStore> {
        Arc::new(self.clone())
    }

    pub fn receipt_store(&self) -> Arc<dyn ReceiptStore> {
        Arc::new(self.clone())
    }

    pub fn notification_store(&self) -> Arc<dyn NotificationStore> {
        Arc::new(self.clone())
    }

    pub fn file_storage(&self) -> Arc<dyn FileStorage> {
        Arc::new(self.clone())
    }

    /// Size and content type of a stored object, if present.
    pub fn object_info(&self, bucket: &str, path: &str) -> Option<(usize, String)> {
        let files = self.inner.files.lock().unwrap_or_else(|e| e.into_inner());
        files
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| (o.bytes.len(), o.content_type.clone()))
    }

    fn lock_messages(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.inner.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task forwarding filtered feed events into a subscription.
/// Ends as soon as the subscriber drops its receiving half.
fn forward<R, F>(feed: &broadcast::Sender<ChangeEvent<R>>, filter: F) -> FeedSubscription<R>
where
    R: Clone + Send + 'static,
    F: Fn(&R) -> bool + Send + 'static,
{
    let mut rx = feed.subscribe();
    let (tx, sub) = FeedSubscription::channel();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if filter(event.row()) && tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change-feed subscriber lagged, events missed");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Change-feed forwarder stopped");
    });

    sub
}

// ---------------------------------------------------------------------------
// MessageStore
// ---------------------------------------------------------------------------

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn fetch_conversation(
        &self,
        key: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<Message>, TransportError> {
        let mut rows: Vec<Message> = self
            .lock_messages()
            .iter()
            .filter(|m| key.matches(&m.sender_id, &m.receiver_id))
            .cloned()
            .collect();

        rows.sort_by(|a, b| (a.created_at, a.id.0).cmp(&(b.created_at, b.id.0)));

        // Most recent `limit`, still in ascending order.
        let skip = rows.len().saturating_sub(limit as usize);
        Ok(rows.split_off(skip))
    }

    async fn unread_messages(&self, receiver: UserId) -> Result<Vec<Message>, TransportError> {
        Ok(self
            .lock_messages()
            .iter()
            .filter(|m| m.receiver_id == receiver && !m.is_read)
            .cloned()
            .collect())
    }

    async fn insert(&self, message: Message) -> Result<(), TransportError> {
        {
            let mut rows = self.lock_messages();
            if rows.iter().any(|m| m.id == message.id) {
                return Err(TransportError::Store(format!(
                    "duplicate message id {}",
                    message.id
                )));
            }
            rows.push(message.clone());
        }
        let _ = self.inner.message_feed.send(ChangeEvent::Insert(message));
        Ok(())
    }

    async fn update(&self, message: Message) -> Result<(), TransportError> {
        {
            let mut rows = self.lock_messages();
            let slot = rows
                .iter_mut()
                .find(|m| m.id == message.id)
                .ok_or(TransportError::NotFound)?;
            *slot = message.clone();
        }
        let _ = self.inner.message_feed.send(ChangeEvent::Update(message));
        Ok(())
    }

    async fn delete(&self, id: MessageId) -> Result<(), TransportError> {
        let removed = {
            let mut rows = self.lock_messages();
            match rows.iter().position(|m| m.id == id) {
                Some(pos) => Some(rows.remove(pos)),
                None => None,
            }
        };
        if let Some(row) = removed {
            let _ = self.inner.message_feed.send(ChangeEvent::Delete(row));
        }
        Ok(())
    }

    async fn mark_read_from(
        &self,
        receiver: UserId,
        sender: UserId,
    ) -> Result<u64, TransportError> {
        let now = Utc::now();
        let flipped: Vec<Message> = {
            let mut rows = self.lock_messages();
            rows.iter_mut()
                .filter(|m| m.receiver_id == receiver && m.sender_id == sender && !m.is_read)
                .map(|m| {
                    m.is_read = true;
                    m.read_at = Some(now);
                    m.updated_at = now;
                    m.clone()
                })
                .collect()
        };

        let count = flipped.len() as u64;
        for row in flipped {
            let _ = self.inner.message_feed.send(ChangeEvent::Update(row));
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// ReceiptStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ReceiptStore for MemoryBackend {
    async fn upsert(
        &self,
        message_id: MessageId,
        reader: UserId,
    ) -> Result<bool, TransportError> {
        let receipt = ReadReceipt::new(message_id, reader);
        {
            let mut rows = self.inner.receipts.lock().unwrap_or_else(|e| e.into_inner());
            if rows
                .iter()
                .any(|r| r.message_id == message_id && r.user_id == reader)
            {
                return Ok(false);
            }
            rows.push(receipt.clone());
        }
        let _ = self.inner.receipt_feed.send(ChangeEvent::Insert(receipt));
        Ok(true)
    }

    async fn upsert_many(
        &self,
        message_ids: &[MessageId],
        reader: UserId,
    ) -> Result<(), TransportError> {
        for id in message_ids {
            self.upsert(*id, reader).await?;
        }
        Ok(())
    }

    async fn readers_for(
        &self,
        message_ids: &[MessageId],
    ) -> Result<HashMap<MessageId, HashSet<UserId>>, TransportError> {
        let wanted: HashSet<MessageId> = message_ids.iter().copied().collect();
        let rows = self.inner.receipts.lock().unwrap_or_else(|e| e.into_inner());

        let mut readers: HashMap<MessageId, HashSet<UserId>> = HashMap::new();
        for receipt in rows.iter().filter(|r| wanted.contains(&r.message_id)) {
            readers
                .entry(receipt.message_id)
                .or_default()
                .insert(receipt.user_id);
        }
        Ok(readers)
    }
}

// ---------------------------------------------------------------------------
// NotificationStore
// ---------------------------------------------------------------------------

#[async_trait]
impl NotificationStore for MemoryBackend {
    async fn publish(&self, notification: Notification) -> Result<(), TransportError> {
        {
            let mut rows = self
                .inner
                .notifications
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            rows.push(notification.clone());
        }
        let _ = self
            .inner
            .notification_feed
            .send(ChangeEvent::Insert(notification));
        Ok(())
    }

    async fn for_user(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, TransportError> {
        let mut rows: Vec<Notification> = self
            .inner
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|n| n.user_id == user)
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

#[async_trait]
impl FileStorage for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), TransportError> {
        let mut files = self.inner.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(
            (bucket.to_string(), path.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, TransportError> {
        let files = self.inner.files.lock().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = files
            .keys()
            .filter(|(b, p)| b == bucket && p.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), TransportError> {
        let mut files = self.inner.files.lock().unwrap_or_else(|e| e.into_inner());
        for path in paths {
            files.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn pair() -> (UserId, UserId) {
        (UserId::new(), UserId::new())
    }

    async fn next<R>(sub: &mut FeedSubscription<R>) -> ChangeEvent<R> {
        timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("feed event timed out")
            .expect("feed closed")
    }

    #[tokio::test]
    async fn test_fetch_conversation_limit_and_order() {
        let backend = MemoryBackend::new();
        let (a, b) = pair();
        let key = ConversationKey::new(a, b);

        for i in 0..5 {
            let mut m = Message::text(a, b, format!("m{i}"));
            m.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            backend.insert(m).await.unwrap();
        }

        let rows = backend.fetch_conversation(&key, 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].content, "m2");
        assert_eq!(rows[2].content, "m4");
        assert!(rows.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_subscription_filters_by_conversation() {
        let backend = MemoryBackend::new();
        let (a, b) = pair();
        let c = UserId::new();
        let key = ConversationKey::new(a, b);

        let mut sub =
            backend.subscribe_messages(move |m| key.matches(&m.sender_id, &m.receiver_id));

        backend.insert(Message::text(a, c, "other")).await.unwrap();
        backend.insert(Message::text(b, a, "ours")).await.unwrap();

        match next(&mut sub).await {
            ChangeEvent::Insert(m) => assert_eq!(m.content, "ours"),
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let backend = MemoryBackend::new();
        let (a, b) = pair();
        let m = Message::text(a, b, "once");

        backend.insert(m.clone()).await.unwrap();
        assert!(backend.insert(m).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_read_from_emits_updates() {
        let backend = MemoryBackend::new();
        let (me, sender) = pair();

        let mut sub = backend.subscribe_messages(move |m| m.receiver_id == me);

        backend.insert(Message::text(sender, me, "1")).await.unwrap();
        backend.insert(Message::text(sender, me, "2")).await.unwrap();
        assert!(matches!(next(&mut sub).await, ChangeEvent::Insert(_)));
        assert!(matches!(next(&mut sub).await, ChangeEvent::Insert(_)));

        let flipped = backend.mark_read_from(me, sender).await.unwrap();
        assert_eq!(flipped, 2);
        for _ in 0..2 {
            match next(&mut sub).await {
                ChangeEvent::Update(m) => {
                    assert!(m.is_read);
                    assert!(m.read_at.is_some());
                }
                other => panic!("Unexpected event: {other:?}"),
            }
        }

        assert_eq!(backend.unread_messages(me).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_receipt_upsert_is_idempotent() {
        let backend = MemoryBackend::new();
        let reader = UserId::new();
        let id = MessageId::new();

        assert!(backend.upsert(id, reader).await.unwrap());
        assert!(!backend.upsert(id, reader).await.unwrap());

        let readers = backend.readers_for(&[id]).await.unwrap();
        assert_eq!(readers[&id].len(), 1);
    }

    #[tokio::test]
    async fn test_file_storage_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .upload("chat-media", "u1/a.ogg", vec![1, 2, 3], "audio/ogg")
            .await
            .unwrap();
        backend
            .upload("chat-media", "u1/b.jpg", vec![4], "image/jpeg")
            .await
            .unwrap();

        assert_eq!(
            backend.list("chat-media", "u1/").await.unwrap(),
            vec!["u1/a.ogg".to_string(), "u1/b.jpg".to_string()]
        );
        assert_eq!(
            backend.public_url("chat-media", "u1/a.ogg"),
            "memory://chat-media/u1/a.ogg"
        );
        assert_eq!(
            backend.object_info("chat-media", "u1/a.ogg"),
            Some((3, "audio/ogg".to_string()))
        );

        backend
            .remove("chat-media", &["u1/a.ogg".to_string()])
            .await
            .unwrap();
        assert_eq!(
            backend.list("chat-media", "u1/").await.unwrap(),
            vec!["u1/b.jpg".to_string()]
        );
    }
}
