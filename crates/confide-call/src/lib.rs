//! # confide-call
//!
//! Peer-to-peer call signaling: exactly one active media connection per
//! call attempt, negotiated over a call-id-scoped broadcast channel with
//! no dedicated signaling server.
//!
//! The pure state machine lives in [`signaling`]; [`session`] drives it
//! against the platform's peer connection and media devices, which sit
//! behind the [`peer`] and [`media`] trait seams. [`loopback`] provides
//! an in-process peer implementation for tests and simulations.

pub mod loopback;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use loopback::{LoopbackConnection, LoopbackConnector};
pub use media::{DeniedMediaSource, LocalMedia, MediaError, MediaSource, NullMediaSource};
pub use peer::{
    PeerConnection, PeerConnectionState, PeerConnector, PeerError, PeerEvent, PeerSetup,
    RemoteStream,
};
pub use session::{CallError, CallEvent, CallSession};
pub use signaling::{CallPhase, SignalingAction, SignalingError, SignalingSession};
