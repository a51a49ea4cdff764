//! Online presence tracking over the shared presence channel.
//!
//! The tracker announces the local user and folds Sync/Join/Leave events
//! into a membership set. Queries are eventually consistent: a peer shows
//! online only once its Join (or a Sync containing it) has arrived.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use confide_shared::UserId;
use confide_transport::{PresenceChannel, PresenceEvent};

use crate::events::{AppEvent, EventBus};

pub struct PresenceTracker {
    online: Arc<Mutex<HashSet<UserId>>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl PresenceTracker {
    /// Announce the local user on `channel` and start folding events.
    pub fn start(mut channel: PresenceChannel, bus: EventBus) -> Self {
        channel.track();

        let online = Arc::new(Mutex::new(HashSet::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(presence_loop(online.clone(), channel, bus, shutdown_rx));

        Self {
            online,
            shutdown_tx,
        }
    }

    pub fn is_user_online(&self, user: UserId) -> bool {
        self.online
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&user)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.online
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }

    /// Stop tracking. Dropping the channel announces our leave to peers.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn presence_loop(
    online: Arc<Mutex<HashSet<UserId>>>,
    mut channel: PresenceChannel,
    bus: EventBus,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,

            event = channel.recv() => {
                let Some(event) = event else {
                    debug!("Presence channel closed");
                    break;
                };
                match event {
                    PresenceEvent::Sync(members) => {
                        let mut online = online.lock().unwrap_or_else(|e| e.into_inner());
                        *online = members.into_iter().collect();
                    }
                    PresenceEvent::Join(user) => {
                        let added = online
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(user);
                        if added {
                            bus.emit(AppEvent::PresenceChanged { user, online: true });
                        }
                    }
                    PresenceEvent::Leave(user) => {
                        let removed = online
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&user);
                        if removed {
                            bus.emit(AppEvent::PresenceChanged { user, online: false });
                        }
                    }
                }
            }
        }
    }
}
