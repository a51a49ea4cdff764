use thiserror::Error;

/// Errors surfaced by the realtime transport adapter.
///
/// Transient by nature: callers either retry via an explicit
/// `refresh`/`resync`, or log and let the next event self-correct.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying channel or connection is gone.
    #[error("Transport channel closed")]
    ChannelClosed,

    /// A row-store operation failed (fetch, insert, update, upsert, delete).
    #[error("Row store error: {0}")]
    Store(String),

    /// A file-storage operation failed (upload, list, remove).
    #[error("File storage error: {0}")]
    Storage(String),

    /// A payload could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The referenced row does not exist.
    #[error("Record not found")]
    NotFound,
}
