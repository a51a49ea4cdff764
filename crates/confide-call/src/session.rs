//! Call session driver.
//!
//! One [`CallSession`] per call attempt. It owns the local media, the
//! peer connection, and the background loop that shuttles signals between
//! the call channel and the signaling state machine. Teardown runs
//! exactly once, whichever of local hangup, remote hangup, transport
//! loss, or scope drop happens first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use confide_shared::protocol::CallSignal;
use confide_shared::{CallId, CallKind, TransportError, UserId};
use confide_transport::{BroadcastChannel, BroadcastSender};

use crate::media::{LocalMedia, MediaError, MediaSource};
use crate::peer::{PeerConnection, PeerConnectionState, PeerConnector, PeerError, PeerEvent};
use crate::signaling::{CallPhase, SignalingAction, SignalingError, SignalingSession};

const CALL_EVENT_CAPACITY: usize = 32;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Events the surrounding UI observes about one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    PhaseChanged(CallPhase),
    /// A remote media stream became available for rendering.
    RemoteStream(crate::peer::RemoteStream),
    /// The call is over and every resource is released. Sent exactly once.
    Ended { call_id: CallId },
}

struct CallShared {
    call_id: CallId,
    signaling: Mutex<SignalingSession>,
    media: LocalMedia,
    peer: Arc<dyn PeerConnection>,
    signal_tx: BroadcastSender<CallSignal>,
    events_tx: mpsc::Sender<CallEvent>,
    ended: AtomicBool,
}

impl CallShared {
    /// Release every call resource. Safe to race: only the first caller
    /// does the work, so media tracks stop and `Ended` fires exactly once.
    async fn teardown(&self, announce: bool) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }

        let hangup = {
            let mut signaling = self.signaling.lock().unwrap_or_else(|e| e.into_inner());
            signaling.hangup()
        };

        self.media.stop();
        self.peer.close().await;

        if announce {
            // Best effort: the remote peer may already be gone.
            if let Some(signal) = hangup {
                if let Err(e) = self.signal_tx.send(&signal) {
                    debug!(call = %self.call_id, error = %e, "Hangup notice not delivered");
                }
            }
        }

        let _ = self
            .events_tx
            .send(CallEvent::Ended {
                call_id: self.call_id,
            })
            .await;
        info!(call = %self.call_id, "Call torn down");
    }

    fn phase(&self) -> CallPhase {
        self.signaling
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .phase()
    }
}

/// Handle to one active call.
///
/// There is no session while idle: `initialize`/`answer` create one, and
/// hanging up (or dropping the handle when its owning scope deactivates)
/// destroys it. Ending an idle call is therefore inherently a no-op.
pub struct CallSession {
    shared: Arc<CallShared>,
    shutdown_tx: mpsc::Sender<()>,
}

impl CallSession {
    /// Start an outgoing call: acquire media, create the peer connection,
    /// send the one offer of this attempt.
    ///
    /// `channel` must be the broadcast channel named by
    /// `call_id.to_channel()`, opened before this call so no signal can
    /// slip past the subscription.
    ///
    /// Media denial rejects the whole attempt; callers surface it to the
    /// user instead of retrying.
    pub async fn initialize(
        call_id: CallId,
        channel: BroadcastChannel<CallSignal>,
        media_source: &dyn MediaSource,
        connector: &dyn PeerConnector,
        local: UserId,
        remote: UserId,
        kind: CallKind,
    ) -> Result<(Self, mpsc::Receiver<CallEvent>), CallError> {
        let media = media_source.acquire(kind).await?;
        let setup = connector.create_offer(kind).await?;

        let mut signaling = SignalingSession::new(call_id, local, remote, kind);
        let offer = signaling.offer(setup.local_sdp.clone())?;

        let session = Self::spawn(channel, signaling, media, setup, offer)?;
        info!(call = %call_id, remote = %remote.short(), ?kind, "Call initialized");
        Ok(session)
    }

    /// Answer an inbound offer: acquire media, create the peer connection
    /// with the remote description applied, send the one answer.
    pub async fn answer(
        channel: BroadcastChannel<CallSignal>,
        media_source: &dyn MediaSource,
        connector: &dyn PeerConnector,
        local: UserId,
        offer: &CallSignal,
    ) -> Result<(Self, mpsc::Receiver<CallEvent>), CallError> {
        let mut signaling = SignalingSession::from_offer(local, offer)?;
        let kind = signaling.kind();

        let media = media_source.acquire(kind).await?;
        let remote_sdp = signaling
            .remote_sdp()
            .map(str::to_owned)
            .unwrap_or_default();
        let setup = connector.create_answer(kind, &remote_sdp).await?;

        let answer = signaling.answer(setup.local_sdp.clone())?;

        let session = Self::spawn(channel, signaling, media, setup, answer)?;
        info!(call = %session.0.call_id(), from = %offer.from.short(), ?kind, "Call answered");
        Ok(session)
    }

    fn spawn(
        channel: BroadcastChannel<CallSignal>,
        signaling: SignalingSession,
        media: LocalMedia,
        setup: crate::peer::PeerSetup,
        outbound: CallSignal,
    ) -> Result<(Self, mpsc::Receiver<CallEvent>), CallError> {
        let (events_tx, events_rx) = mpsc::channel(CALL_EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let shared = Arc::new(CallShared {
            call_id: signaling.call_id(),
            signaling: Mutex::new(signaling),
            media,
            peer: setup.connection,
            signal_tx: channel.sender(),
            events_tx,
            ended: AtomicBool::new(false),
        });

        // The channel was subscribed before any send, so the remote side
        // sees this signal no matter how fast it responds.
        shared.signal_tx.send(&outbound)?;

        tokio::spawn(run_loop(
            shared.clone(),
            channel,
            setup.events,
            shutdown_rx,
        ));

        Ok((
            Self {
                shared,
                shutdown_tx,
            },
            events_rx,
        ))
    }

    pub fn call_id(&self) -> CallId {
        self.shared.call_id
    }

    pub fn phase(&self) -> CallPhase {
        self.shared.phase()
    }

    /// Synchronous flip of the audio track. Returns whether the
    /// microphone is now muted.
    pub fn toggle_mute(&self) -> bool {
        self.shared.media.toggle_mute()
    }

    /// Synchronous flip of the video track. Returns whether video is now
    /// enabled.
    pub fn toggle_video(&self) -> bool {
        self.shared.media.toggle_video()
    }

    pub fn peer_state(&self) -> PeerConnectionState {
        self.shared.peer.state()
    }

    /// Hang up. Safe to call any number of times; teardown happens once.
    pub async fn end(&self) {
        self.shared.teardown(true).await;
        let _ = self.shutdown_tx.try_send(());
    }
}

async fn run_loop(
    shared: Arc<CallShared>,
    mut channel: BroadcastChannel<CallSignal>,
    mut peer_events: mpsc::Receiver<PeerEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut peer_done = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                // Explicit end() already tore down; a dropped session
                // (owning scope deactivated) tears down here.
                shared.teardown(true).await;
                break;
            }

            signal = channel.recv() => match signal {
                Some(signal) => {
                    if handle_signal(&shared, &signal).await {
                        break;
                    }
                }
                None => {
                    warn!(call = %shared.call_id, "Signal channel closed, ending call");
                    shared.teardown(false).await;
                    break;
                }
            },

            event = peer_events.recv(), if !peer_done => match event {
                Some(PeerEvent::IceCandidate(candidate)) => {
                    let signal = {
                        let signaling = shared.signaling.lock().unwrap_or_else(|e| e.into_inner());
                        signaling.candidate(candidate)
                    };
                    if let Err(e) = shared.signal_tx.send(&signal) {
                        warn!(call = %shared.call_id, error = %e, "Failed to send ICE candidate");
                    }
                }
                Some(PeerEvent::RemoteStream(stream)) => {
                    debug!(call = %shared.call_id, stream = %stream.stream_id, "Remote stream attached");
                    let _ = shared.events_tx.send(CallEvent::RemoteStream(stream)).await;
                }
                Some(PeerEvent::StateChanged(state)) => {
                    debug!(call = %shared.call_id, ?state, "Peer connection state changed");
                }
                None => {
                    peer_done = true;
                }
            },
        }
    }
}

/// Apply one inbound signal. Returns `true` when the loop must stop.
async fn handle_signal(shared: &Arc<CallShared>, signal: &CallSignal) -> bool {
    let action = {
        let mut signaling = shared.signaling.lock().unwrap_or_else(|e| e.into_inner());
        signaling.handle(signal)
    };

    match action {
        SignalingAction::ApplyRemoteDescription(sdp) => {
            if let Err(e) = shared.peer.set_remote_description(&sdp).await {
                // Protocol error on this signal only; the call survives.
                warn!(call = %shared.call_id, error = %e, "Failed to apply remote description");
                return false;
            }
            let queued = {
                let mut signaling = shared.signaling.lock().unwrap_or_else(|e| e.into_inner());
                signaling.mark_remote_applied()
            };
            for candidate in queued {
                if let Err(e) = shared.peer.add_ice_candidate(&candidate).await {
                    warn!(call = %shared.call_id, error = %e, "Queued candidate not applied");
                }
            }
            let _ = shared
                .events_tx
                .send(CallEvent::PhaseChanged(CallPhase::Connected))
                .await;
            false
        }
        SignalingAction::ApplyCandidate(candidate) => {
            if let Err(e) = shared.peer.add_ice_candidate(&candidate).await {
                warn!(call = %shared.call_id, error = %e, "Candidate not applied");
            }
            false
        }
        SignalingAction::Close => {
            shared.teardown(false).await;
            true
        }
        SignalingAction::Ignore => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackConnector;
    use crate::media::{DeniedMediaSource, NullMediaSource};
    use confide_transport::MemoryBackend;
    use tokio::time::{timeout, Duration};

    async fn wait_for_phase(session: &CallSession, phase: CallPhase) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while session.phase() != phase {
            assert!(
                tokio::time::Instant::now() < deadline,
                "Timed out waiting for {phase:?}, at {:?}",
                session.phase()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<CallEvent>) -> CallEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("call event timed out")
            .expect("call event stream ended")
    }

    #[tokio::test]
    async fn test_media_denied_fails_initialization() {
        let backend = MemoryBackend::new();
        let call_id = CallId::new();
        let channel = backend.broadcast(&call_id.to_channel());

        let result = CallSession::initialize(
            call_id,
            channel,
            &DeniedMediaSource,
            &LoopbackConnector::new(),
            UserId::new(),
            UserId::new(),
            CallKind::Video,
        )
        .await;

        assert!(matches!(
            result.err(),
            Some(CallError::Media(MediaError::PermissionDenied))
        ));
    }

    #[tokio::test]
    async fn test_full_call_between_two_sessions() {
        let backend = MemoryBackend::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let call_id = CallId::new();

        // Bob's side of the channel exists before Alice sends the offer.
        let mut bob_channel = backend.broadcast::<CallSignal>(&call_id.to_channel());
        let alice_channel = backend.broadcast::<CallSignal>(&call_id.to_channel());

        let alice_connector = LoopbackConnector::new();
        let (alice_session, mut alice_events) = CallSession::initialize(
            call_id,
            alice_channel,
            &NullMediaSource,
            &alice_connector,
            alice,
            bob,
            CallKind::Video,
        )
        .await
        .unwrap();
        assert_eq!(alice_session.phase(), CallPhase::Offering);

        let offer = timeout(Duration::from_secs(2), bob_channel.recv())
            .await
            .unwrap()
            .unwrap();

        let bob_connector = LoopbackConnector::new();
        let (bob_session, mut bob_events) = CallSession::answer(
            bob_channel,
            &NullMediaSource,
            &bob_connector,
            bob,
            &offer,
        )
        .await
        .unwrap();
        assert_eq!(bob_session.phase(), CallPhase::Connected);

        wait_for_phase(&alice_session, CallPhase::Connected).await;

        // Candidates flowed in both directions.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let alice_got = alice_connector.connections()[0].applied_candidates().len();
            let bob_got = bob_connector.connections()[0].applied_candidates().len();
            if alice_got == 2 && bob_got == 2 {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "candidates missing: alice {alice_got}, bob {bob_got}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Hangup propagates: both sides terminate, each Ended fires once.
        alice_session.end().await;
        assert_eq!(alice_session.phase(), CallPhase::Terminated);

        wait_for_phase(&bob_session, CallPhase::Terminated).await;

        loop {
            if let CallEvent::Ended { call_id: ended } = next_event(&mut alice_events).await {
                assert_eq!(ended, call_id);
                break;
            }
        }
        loop {
            if let CallEvent::Ended { call_id: ended } = next_event(&mut bob_events).await {
                assert_eq!(ended, call_id);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_end_twice_tears_down_once() {
        let backend = MemoryBackend::new();
        let call_id = CallId::new();
        let channel = backend.broadcast(&call_id.to_channel());

        let connector = LoopbackConnector::new();
        let (session, mut events) = CallSession::initialize(
            call_id,
            channel,
            &NullMediaSource,
            &connector,
            UserId::new(),
            UserId::new(),
            CallKind::Audio,
        )
        .await
        .unwrap();

        session.end().await;
        session.end().await;

        assert_eq!(session.phase(), CallPhase::Terminated);
        assert_eq!(session.peer_state(), PeerConnectionState::Closed);

        // Exactly one Ended event even after the double end.
        assert_eq!(next_event(&mut events).await, CallEvent::Ended { call_id });
        drop(session);
        loop {
            match events.recv().await {
                Some(CallEvent::Ended { .. }) => panic!("Ended delivered twice"),
                Some(_) => continue,
                None => break,
            }
        }
    }

    #[tokio::test]
    async fn test_toggles_do_not_renegotiate() {
        let backend = MemoryBackend::new();
        let call_id = CallId::new();
        let channel = backend.broadcast(&call_id.to_channel());

        let connector = LoopbackConnector::with_candidates(0);
        let (session, _events) = CallSession::initialize(
            call_id,
            channel,
            &NullMediaSource,
            &connector,
            UserId::new(),
            UserId::new(),
            CallKind::Video,
        )
        .await
        .unwrap();

        assert!(session.toggle_mute());
        assert!(!session.toggle_mute());
        assert!(!session.toggle_video());
        assert!(session.toggle_video());

        // Still just the one offering negotiation, no extra descriptions.
        assert_eq!(session.phase(), CallPhase::Offering);
        assert!(connector.connections()[0].remote_description().is_none());

        session.end().await;
    }
}
