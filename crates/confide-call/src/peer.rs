//! Peer-connection trait seam.
//!
//! The actual RTC stack (description negotiation, ICE gathering, media
//! transport) is owned by the host platform. The call engine only drives
//! it: apply remote descriptions, feed candidates, close. Locally
//! gathered candidates and remote tracks come back as [`PeerEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use confide_shared::CallKind;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Peer connection error: {0}")]
    Connection(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// A media stream arriving from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub kind: CallKind,
}

/// Asynchronous output of a live peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A locally gathered ICE candidate, to be signaled immediately.
    IceCandidate(String),
    RemoteStream(RemoteStream),
    StateChanged(PeerConnectionState),
}

/// Driving surface of one peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn set_remote_description(&self, sdp: &str) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), PeerError>;

    /// Close the connection. Idempotent.
    async fn close(&self);

    fn state(&self) -> PeerConnectionState;
}

/// A freshly created peer connection plus its negotiation artifacts.
pub struct PeerSetup {
    pub connection: Arc<dyn PeerConnection>,
    /// Local session description: the offer or answer to signal.
    pub local_sdp: String,
    pub events: mpsc::Receiver<PeerEvent>,
}

/// Factory for peer connections, one per call attempt.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create the offering side's connection and its local offer.
    async fn create_offer(&self, kind: CallKind) -> Result<PeerSetup, PeerError>;

    /// Create the answering side's connection with the remote offer
    /// already applied, and its local answer.
    async fn create_answer(&self, kind: CallKind, remote_offer: &str)
        -> Result<PeerSetup, PeerError>;
}
