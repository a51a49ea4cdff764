//! Presence channels.
//!
//! A presence channel reports which client keys are currently joined.
//! Subscribers first receive a full-state sync, then incremental join and
//! leave events. A client only becomes visible to peers once it announces
//! itself via [`PresenceChannel::track`]; dropping the handle leaves.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use confide_shared::constants::SIGNAL_CHANNEL_CAPACITY;
use confide_shared::UserId;

/// One event from a presence channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Full replacement of the joined set. Delivered on subscribe and
    /// whenever the receiver fell behind and must re-baseline.
    Sync(Vec<UserId>),
    Join(UserId),
    Leave(UserId),
}

pub(crate) struct Room {
    members: HashSet<UserId>,
    tx: broadcast::Sender<PresenceEvent>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            tx: broadcast::channel(SIGNAL_CHANNEL_CAPACITY).0,
        }
    }
}

pub(crate) type RoomRegistry = Arc<Mutex<HashMap<String, Room>>>;

/// Handle to one presence channel.
pub struct PresenceChannel {
    name: String,
    local: UserId,
    rooms: RoomRegistry,
    rx: broadcast::Receiver<PresenceEvent>,
    /// Initial full-state sync, handed out by the first `recv`.
    pending_sync: Option<Vec<UserId>>,
    tracked: bool,
}

impl PresenceChannel {
    /// Join the named channel as an observer. The local key stays
    /// invisible to peers until [`track`](Self::track) is called.
    pub(crate) fn join(rooms: RoomRegistry, name: &str, local: UserId) -> Self {
        let (rx, snapshot) = {
            let mut map = rooms.lock().unwrap_or_else(|e| e.into_inner());
            let room = map.entry(name.to_string()).or_insert_with(Room::new);
            (room.tx.subscribe(), room.members.iter().copied().collect())
        };
        debug!(channel = %name, local = %local.short(), "Joined presence channel");

        Self {
            name: name.to_string(),
            local,
            rooms,
            rx,
            pending_sync: Some(snapshot),
            tracked: false,
        }
    }

    /// Announce the local key as online. Idempotent; peers observe one
    /// join event.
    pub fn track(&mut self) {
        if self.tracked {
            return;
        }
        self.tracked = true;

        let mut map = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(room) = map.get_mut(&self.name) {
            if room.members.insert(self.local) {
                let _ = room.tx.send(PresenceEvent::Join(self.local));
                debug!(channel = %self.name, local = %self.local.short(), "Tracking presence");
            }
        }
    }

    /// Wait for the next presence event.
    ///
    /// A lagged receiver self-corrects: instead of surfacing the gap it
    /// returns a fresh full-state sync.
    pub async fn recv(&mut self) -> Option<PresenceEvent> {
        if let Some(snapshot) = self.pending_sync.take() {
            return Some(PresenceEvent::Sync(snapshot));
        }

        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    let map = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
                    let snapshot = map
                        .get(&self.name)
                        .map(|room| room.members.iter().copied().collect())
                        .unwrap_or_default();
                    return Some(PresenceEvent::Sync(snapshot));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for PresenceChannel {
    fn drop(&mut self) {
        if !self.tracked {
            return;
        }
        let mut map = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(room) = map.get_mut(&self.name) {
            if room.members.remove(&self.local) {
                let _ = room.tx.send(PresenceEvent::Leave(self.local));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_rooms() -> RoomRegistry {
        Arc::new(Mutex::new(HashMap::new()))
    }

    #[tokio::test]
    async fn test_sync_then_join_then_leave() {
        let rooms = new_rooms();
        let alice = UserId::new();
        let bob = UserId::new();

        let mut a = PresenceChannel::join(rooms.clone(), "online", alice);
        a.track();
        assert_eq!(a.recv().await, Some(PresenceEvent::Sync(vec![])));
        assert_eq!(a.recv().await, Some(PresenceEvent::Join(alice)));

        // Bob joins after Alice tracked: his sync already contains her.
        let mut b = PresenceChannel::join(rooms.clone(), "online", bob);
        b.track();
        assert_eq!(b.recv().await, Some(PresenceEvent::Sync(vec![alice])));
        assert_eq!(b.recv().await, Some(PresenceEvent::Join(bob)));

        assert_eq!(a.recv().await, Some(PresenceEvent::Join(bob)));

        drop(b);
        assert_eq!(a.recv().await, Some(PresenceEvent::Leave(bob)));
    }

    #[tokio::test]
    async fn test_track_is_idempotent() {
        let rooms = new_rooms();
        let alice = UserId::new();
        let observer = UserId::new();

        let mut watcher = PresenceChannel::join(rooms.clone(), "online", observer);
        assert_eq!(watcher.recv().await, Some(PresenceEvent::Sync(vec![])));

        let mut a = PresenceChannel::join(rooms.clone(), "online", alice);
        a.track();
        a.track();

        assert_eq!(watcher.recv().await, Some(PresenceEvent::Join(alice)));
        drop(a);
        assert_eq!(watcher.recv().await, Some(PresenceEvent::Leave(alice)));
    }

    #[tokio::test]
    async fn test_untracked_observer_never_announced() {
        let rooms = new_rooms();
        let alice = UserId::new();
        let lurker = UserId::new();

        let _lurk = PresenceChannel::join(rooms.clone(), "online", lurker);
        let mut a = PresenceChannel::join(rooms.clone(), "online", alice);
        a.track();

        // Alice's own sync was captured before she tracked, so it is empty:
        // the lurker never announced.
        assert_eq!(a.recv().await, Some(PresenceEvent::Sync(vec![])));
    }
}
