//! Read-receipt tracking: per-sender unread counters for direct chats and
//! per-message reader sets for community threads.
//!
//! Both trackers are baseline-plus-delta: one bulk fetch establishes the
//! baseline, feed events adjust it, and `resync()` throws the deltas away
//! and refetches after a suspected gap. Marks are optimistic: local state
//! flips before the server write resolves.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use confide_shared::constants::RECEIPT_WINDOW;
use confide_shared::{MessageId, ReadReceipt, TransportError, UserId};
use confide_transport::{ChangeEvent, FeedSubscription, MessageStore, ReceiptStore};

use crate::events::{AppEvent, EventBus};

// ---------------------------------------------------------------------------
// Per-sender unread counters (direct chats)
// ---------------------------------------------------------------------------

/// Map of unread message id to its sender.
///
/// Counters are derived from this map on demand, so the sum of all
/// counters always equals the number of observed unread messages.
type UnreadMap = HashMap<MessageId, UserId>;

pub struct UnreadTracker {
    local: UserId,
    store: Arc<dyn MessageStore>,
    unread: Arc<Mutex<UnreadMap>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl UnreadTracker {
    /// Fetch the unread baseline, then spawn the delta loop.
    pub async fn start(
        local: UserId,
        store: Arc<dyn MessageStore>,
        feed: FeedSubscription<confide_shared::Message>,
        bus: EventBus,
    ) -> Result<Self, TransportError> {
        let unread = Arc::new(Mutex::new(baseline(&store, local).await?));

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(unread_loop(
            local,
            unread.clone(),
            feed,
            bus,
            shutdown_rx,
        ));

        Ok(Self {
            local,
            store,
            unread,
            shutdown_tx,
        })
    }

    /// Current unread counts, grouped by sender. Senders with nothing
    /// unread are absent.
    pub fn counts(&self) -> HashMap<UserId, u32> {
        let unread = self.unread.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts: HashMap<UserId, u32> = HashMap::new();
        for sender in unread.values() {
            *counts.entry(*sender).or_default() += 1;
        }
        counts
    }

    pub fn unread_from(&self, sender: UserId) -> u32 {
        let unread = self.unread.lock().unwrap_or_else(|e| e.into_inner());
        unread.values().filter(|s| **s == sender).count() as u32
    }

    /// Clear the counter for `sender` and ask the server to flip the rows.
    ///
    /// The counter is gone before the write resolves; if the write fails
    /// the error surfaces and `resync()` restores the truth.
    pub async fn mark_as_read(&self, sender: UserId) -> Result<u64, TransportError> {
        {
            let mut unread = self.unread.lock().unwrap_or_else(|e| e.into_inner());
            unread.retain(|_, s| *s != sender);
        }
        self.store.mark_read_from(self.local, sender).await
    }

    /// Discard deltas and refetch the unread baseline.
    pub async fn resync(&self) -> Result<(), TransportError> {
        let fresh = baseline(&self.store, self.local).await?;
        let mut unread = self.unread.lock().unwrap_or_else(|e| e.into_inner());
        *unread = fresh;
        Ok(())
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn baseline(store: &Arc<dyn MessageStore>, local: UserId) -> Result<UnreadMap, TransportError> {
    let rows = store.unread_messages(local).await?;
    Ok(rows.into_iter().map(|m| (m.id, m.sender_id)).collect())
}

async fn unread_loop(
    local: UserId,
    unread: Arc<Mutex<UnreadMap>>,
    mut feed: FeedSubscription<confide_shared::Message>,
    bus: EventBus,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,

            event = feed.recv() => {
                let Some(event) = event else {
                    debug!("Unread feed closed");
                    break;
                };
                if event.row().receiver_id != local {
                    continue;
                }

                let sender = event.row().sender_id;
                let changed = {
                    let mut unread = unread.lock().unwrap_or_else(|e| e.into_inner());
                    match &event {
                        ChangeEvent::Insert(m) if !m.is_read => {
                            unread.insert(m.id, m.sender_id).is_none()
                        }
                        ChangeEvent::Insert(_) => false,
                        // A read flip arrives as an update with is_read set.
                        ChangeEvent::Update(m) if m.is_read => unread.remove(&m.id).is_some(),
                        ChangeEvent::Update(m) => unread.insert(m.id, m.sender_id).is_none(),
                        ChangeEvent::Delete(m) => unread.remove(&m.id).is_some(),
                    }
                };

                if changed {
                    let count = {
                        let unread = unread.lock().unwrap_or_else(|e| e.into_inner());
                        unread.values().filter(|s| **s == sender).count() as u32
                    };
                    bus.emit(AppEvent::UnreadChanged { sender, count });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-message reader sets (community threads)
// ---------------------------------------------------------------------------

pub struct ReadReceiptTracker {
    local: UserId,
    store: Arc<dyn ReceiptStore>,
    window: Vec<MessageId>,
    readers: Arc<Mutex<HashMap<MessageId, HashSet<UserId>>>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReadReceiptTracker {
    /// Fetch reader sets for the visible `window`, then spawn the loop
    /// that folds receipt inserts into them.
    ///
    /// The window is capped at [`RECEIPT_WINDOW`] ids; when the caller
    /// passes more, only the most recent tail is tracked. Receipts for
    /// ids outside the window are ignored, so the folded state and a
    /// `resync()` always agree.
    pub async fn start(
        local: UserId,
        store: Arc<dyn ReceiptStore>,
        feed: FeedSubscription<ReadReceipt>,
        mut window: Vec<MessageId>,
    ) -> Result<Self, TransportError> {
        if window.len() > RECEIPT_WINDOW {
            window.drain(..window.len() - RECEIPT_WINDOW);
        }
        let tracked: HashSet<MessageId> = window.iter().copied().collect();
        let readers = Arc::new(Mutex::new(store.readers_for(&window).await?));

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(receipt_loop(readers.clone(), tracked, feed, shutdown_rx));

        Ok(Self {
            local,
            store,
            window,
            readers,
            shutdown_tx,
        })
    }

    /// How many distinct users have read `id`.
    pub fn count_for(&self, id: MessageId) -> usize {
        let readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
        readers.get(&id).map(HashSet::len).unwrap_or(0)
    }

    /// Record the local user's read of one message. Re-marking an already
    /// read message changes nothing. The receipt row is written even for
    /// ids outside the tracked window; only the local fold is windowed.
    pub async fn mark_message_as_read(&self, id: MessageId) -> Result<(), TransportError> {
        {
            let mut readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
            if self.window.contains(&id) {
                readers.entry(id).or_default().insert(self.local);
            }
        }
        self.store.upsert(id, self.local).await?;
        Ok(())
    }

    /// Batch mark, for a screenful of messages scrolled into view.
    pub async fn mark_messages_as_read(&self, ids: &[MessageId]) -> Result<(), TransportError> {
        {
            let mut readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
            for id in ids {
                if self.window.contains(id) {
                    readers.entry(*id).or_default().insert(self.local);
                }
            }
        }
        self.store.upsert_many(ids, self.local).await
    }

    /// Discard deltas and refetch the window's reader sets.
    pub async fn resync(&self) -> Result<(), TransportError> {
        let fresh = self.store.readers_for(&self.window).await?;
        let mut readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
        *readers = fresh;
        Ok(())
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn receipt_loop(
    readers: Arc<Mutex<HashMap<MessageId, HashSet<UserId>>>>,
    tracked: HashSet<MessageId>,
    mut feed: FeedSubscription<ReadReceipt>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,

            event = feed.recv() => {
                let Some(event) = event else {
                    debug!("Receipt feed closed");
                    break;
                };
                // Receipts are insert-only; set insertion makes duplicate
                // delivery harmless.
                if let ChangeEvent::Insert(receipt) = event {
                    if !tracked.contains(&receipt.message_id) {
                        continue;
                    }
                    let mut readers = readers.lock().unwrap_or_else(|e| e.into_inner());
                    readers
                        .entry(receipt.message_id)
                        .or_default()
                        .insert(receipt.user_id);
                }
            }
        }
    }
}
