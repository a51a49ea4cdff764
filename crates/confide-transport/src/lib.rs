//! # confide-transport
//!
//! Contract surface of the realtime transport adapter the Confide core
//! depends on: change-feed subscriptions keyed by table and filter,
//! named broadcast channels for ephemeral signaling payloads, presence
//! channels reporting joined/left keys, typed row stores, and file
//! storage.
//!
//! The `memory` module is a complete in-process implementation of the
//! whole contract, built on tokio channels. It backs every engine test
//! and doubles as an offline backend; a production adapter maps the same
//! handle types onto the managed backend's wire protocol.

pub mod broadcast;
pub mod feed;
pub mod memory;
pub mod presence;
pub mod storage;
pub mod tables;

pub use broadcast::{BroadcastChannel, BroadcastSender};
pub use confide_shared::TransportError;
pub use feed::{ChangeEvent, FeedSubscription};
pub use memory::MemoryBackend;
pub use presence::{PresenceChannel, PresenceEvent};
pub use storage::FileStorage;
pub use tables::{MessageStore, NotificationStore, ReceiptStore};
