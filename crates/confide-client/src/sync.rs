//! Conversation sync engine.
//!
//! One [`ConversationSync`] per open chat thread. Activation does a single
//! bulk fetch of recent history, then merges the live change feed into a
//! local cache. The cache holds no duplicate ids and stays sorted by
//! creation time; the backend row store remains the source of truth.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use confide_shared::constants::{DEFAULT_FETCH_LIMIT, TYPING_TTL_MS};
use confide_shared::protocol::TypingPing;
use confide_shared::{ConversationKey, Message, MessageId, TransportError, UserId};
use confide_transport::{BroadcastChannel, ChangeEvent, FeedSubscription, MessageStore};

use crate::events::{AppEvent, EventBus};

/// Locally merged view of one conversation's messages.
///
/// Invariants: no two entries share an id, and entries are sorted
/// ascending by `(created_at, id)`. Every mutation preserves both.
#[derive(Default)]
pub struct ConversationCache {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append a message at its sorted position. A message whose id is
    /// already present is ignored, so duplicate delivery is a no-op.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| (m.created_at, m.id) <= (message.created_at, message.id));
        self.messages.insert(at, message);
        true
    }

    /// Replace the entry with the same id in place. Position is unchanged:
    /// edits never reorder history.
    pub fn update(&mut self, message: Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, id: MessageId) -> bool {
        if !self.ids.remove(&id) {
            return false;
        }
        self.messages.retain(|m| m.id != id);
        true
    }

    /// Drop everything and adopt a fresh server snapshot.
    pub fn replace_all(&mut self, mut messages: Vec<Message>) {
        messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        messages.dedup_by_key(|m| m.id);
        self.ids = messages.iter().map(|m| m.id).collect();
        self.messages = messages;
    }
}

/// Active subscription to one conversation.
///
/// Dropping the handle (or calling [`deactivate`](Self::deactivate))
/// stops the merge loop and unsubscribes from the feed.
pub struct ConversationSync {
    key: ConversationKey,
    store: Arc<dyn MessageStore>,
    cache: Arc<Mutex<ConversationCache>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ConversationSync {
    /// Bulk-fetch recent history, then spawn the feed merge loop.
    ///
    /// The feed may carry rows from any conversation; events outside
    /// `key` are skipped here, so callers can hand over an unfiltered
    /// subscription.
    pub async fn activate(
        key: ConversationKey,
        store: Arc<dyn MessageStore>,
        feed: FeedSubscription<Message>,
        bus: EventBus,
    ) -> Result<Self, TransportError> {
        let initial = store.fetch_conversation(&key, DEFAULT_FETCH_LIMIT).await?;
        debug!(conversation = %key, count = initial.len(), "Conversation activated");

        let cache = Arc::new(Mutex::new(ConversationCache::new()));
        {
            let mut guard = cache.lock().unwrap_or_else(|e| e.into_inner());
            guard.replace_all(initial);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(merge_loop(key, cache.clone(), feed, bus, shutdown_rx));

        Ok(Self {
            key,
            store,
            cache,
            shutdown_tx,
        })
    }

    pub fn key(&self) -> ConversationKey {
        self.key
    }

    /// Snapshot of the merged history, ascending by creation time.
    pub fn messages(&self) -> Vec<Message> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .messages()
            .to_vec()
    }

    /// Refetch and replace the cache wholesale. Recovery path for feed
    /// gaps; between a gap and the next refresh the cache is merely stale.
    pub async fn refresh(&self) -> Result<(), TransportError> {
        let fresh = self
            .store
            .fetch_conversation(&self.key, DEFAULT_FETCH_LIMIT)
            .await?;
        let mut guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        guard.replace_all(fresh);
        Ok(())
    }

    /// Stop the merge loop and drop the feed subscription.
    pub async fn deactivate(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn merge_loop(
    key: ConversationKey,
    cache: Arc<Mutex<ConversationCache>>,
    mut feed: FeedSubscription<Message>,
    bus: EventBus,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,

            event = feed.recv() => {
                let Some(event) = event else {
                    debug!(conversation = %key, "Message feed closed");
                    break;
                };
                let row = event.row();
                if !key.matches(&row.sender_id, &row.receiver_id) {
                    continue;
                }

                let mut guard = cache.lock().unwrap_or_else(|e| e.into_inner());
                match event {
                    ChangeEvent::Insert(message) => {
                        if guard.insert(message.clone()) {
                            drop(guard);
                            bus.emit(AppEvent::MessageReceived { conversation: key, message });
                        }
                    }
                    ChangeEvent::Update(message) => {
                        if guard.update(message.clone()) {
                            drop(guard);
                            bus.emit(AppEvent::MessageUpdated { conversation: key, message });
                        }
                    }
                    ChangeEvent::Delete(message) => {
                        if guard.delete(message.id) {
                            drop(guard);
                            bus.emit(AppEvent::MessageDeleted { conversation: key, id: message.id });
                        }
                    }
                }
            }
        }
    }
}

/// Ephemeral typing indicator over the conversation's broadcast channel.
///
/// Pings carry a timestamp so receivers can expire stale indicators; a
/// peer that stops typing simply stops pinging.
pub struct TypingChannel {
    local: UserId,
    channel: BroadcastChannel<TypingPing>,
}

impl TypingChannel {
    pub fn new(local: UserId, channel: BroadcastChannel<TypingPing>) -> Self {
        Self { local, channel }
    }

    /// Announce that the local user is typing. Best effort.
    pub fn ping(&self, conversation: ConversationKey) {
        let ping = TypingPing::new(conversation, self.local);
        if let Err(e) = self.channel.send(&ping) {
            warn!(conversation = %conversation, error = %e, "Typing ping not sent");
        }
    }

    /// Next fresh typing ping from a peer. Own echoes and expired pings
    /// are skipped.
    pub async fn recv(&mut self) -> Option<TypingPing> {
        while let Some(ping) = self.channel.recv().await {
            if ping.user == self.local {
                continue;
            }
            if is_fresh(&ping) {
                return Some(ping);
            }
        }
        None
    }

    /// Surface peer pings as [`AppEvent::Typing`] on the bus. The loop
    /// ends when the channel closes; `abort()` on the returned handle
    /// stops it early.
    pub fn forward(mut self, bus: EventBus) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(ping) = self.recv().await {
                bus.emit(AppEvent::Typing {
                    conversation: ping.conversation,
                    user: ping.user,
                });
            }
        })
    }
}

fn is_fresh(ping: &TypingPing) -> bool {
    let age = Utc::now().signed_duration_since(ping.sent_at);
    age.num_milliseconds() <= TYPING_TTL_MS as i64
}
