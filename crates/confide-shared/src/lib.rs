//! # confide-shared
//!
//! Domain types shared by every Confide crate: ids, persisted row models,
//! the call-signaling wire protocol, the common error taxonomy, and tuning
//! constants.
//!
//! Nothing in this crate performs I/O.

pub mod constants;
pub mod models;
pub mod protocol;
pub mod types;

mod error;

pub use error::TransportError;
pub use models::{Message, Notification, ReadReceipt};
pub use types::{
    CallId, CallKind, ConversationKey, MessageId, MessageKind, NotificationId,
    PreferenceCategory, UserId,
};
