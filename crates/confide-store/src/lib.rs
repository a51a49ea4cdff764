//! # confide-store
//!
//! Device-local persistence for the Confide client.
//!
//! Holds the state that never leaves the device: per-category notification
//! preferences, locally hidden ("deleted for me") messages, and the offline
//! outbox of queued confession posts.  The crate exposes a synchronous
//! `Database` handle that wraps a `rusqlite::Connection` and provides typed
//! CRUD helpers for each concern.

pub mod database;
pub mod hidden;
pub mod migrations;
pub mod outbox;
pub mod preferences;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use outbox::QueuedPost;
