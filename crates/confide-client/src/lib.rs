//! # confide-client
//!
//! Realtime client engines of the Confide app: conversation sync, unread
//! and read-receipt tracking, online presence, and notification dispatch.
//! Each engine runs on its own background task, merges one change feed
//! into local state, and reports to the UI over the shared [`EventBus`].

pub mod attachments;
pub mod events;
pub mod notify;
pub mod presence;
pub mod receipts;
pub mod sync;

use tracing_subscriber::{fmt, EnvFilter};

pub use events::{AppEvent, EventBus, NavigationTarget, Toast};
pub use notify::{NotificationDispatcher, NotificationPermission, Visibility};
pub use presence::PresenceTracker;
pub use receipts::{ReadReceiptTracker, UnreadTracker};
pub use sync::{ConversationCache, ConversationSync, TypingChannel};

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("confide_client=debug,confide_call=debug,confide_transport=debug,confide_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
