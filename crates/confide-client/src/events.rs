//! Client-facing event bus.
//!
//! The realtime engines run on background tasks; everything the UI layer
//! needs to react to arrives as an [`AppEvent`] on a single mpsc channel.
//! Emission is fire-and-forget: a full or closed bus is logged, never an
//! error the engines act on.

use tokio::sync::mpsc;
use uuid::Uuid;

use confide_shared::{ConversationKey, Message, MessageId, NotificationId, UserId};

const EVENT_BUS_CAPACITY: usize = 256;

/// Where a notification click should take the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    Confession(Uuid),
    Chat(UserId),
    Community(Uuid),
    Profile(UserId),
}

/// An in-app toast, shown while the app is foregrounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub notification_id: NotificationId,
    pub title: String,
    pub body: String,
    /// Auto-dismiss delay; the toast can also be dismissed manually.
    pub duration_ms: u64,
    pub target: Option<NavigationTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    MessageReceived {
        conversation: ConversationKey,
        message: Message,
    },
    MessageUpdated {
        conversation: ConversationKey,
        message: Message,
    },
    MessageDeleted {
        conversation: ConversationKey,
        id: MessageId,
    },
    /// A peer is typing in the given conversation.
    Typing {
        conversation: ConversationKey,
        user: UserId,
    },
    /// The unread counter for one sender changed. `count == 0` means the
    /// entry disappeared.
    UnreadChanged { sender: UserId, count: u32 },
    PresenceChanged { user: UserId, online: bool },
    Toast(Toast),
}

/// Clonable sending half of the app event channel.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<AppEvent>,
}

impl EventBus {
    pub fn channel() -> (Self, mpsc::Receiver<AppEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUS_CAPACITY);
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: AppEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::error!(error = %e, "Failed to emit app event");
        }
    }
}
