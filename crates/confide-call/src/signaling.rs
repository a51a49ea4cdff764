use thiserror::Error;
use tracing::debug;

use confide_shared::protocol::{CallSignal, SignalKind};
use confide_shared::{CallId, CallKind, UserId};

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Offer already sent for this call")]
    OfferAlreadySent,

    #[error("Answer only valid while ringing")]
    NotRinging,

    #[error("Signal is not an offer")]
    NotAnOffer,

    #[error("Signal addressed to another user")]
    WrongRecipient,
}

/// Where this end of the call currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    /// Caller: offer sent, waiting for the answer.
    Offering,
    /// Callee: offer received, waiting for the local user to pick up.
    Ringing,
    Connected,
    Terminated,
}

/// What the driver must do with the peer connection after handling an
/// inbound signal.
#[derive(Debug, PartialEq, Eq)]
pub enum SignalingAction {
    /// Apply the remote description, then drain queued candidates via
    /// [`SignalingSession::mark_remote_applied`].
    ApplyRemoteDescription(String),
    ApplyCandidate(String),
    /// Remote hangup: tear the call down.
    Close,
    /// Own echo, wrong call, or out-of-sequence; skip.
    Ignore,
}

/// Pure per-call signaling state machine. Owns no I/O: it turns local
/// intents into outbound [`CallSignal`]s and inbound signals into
/// [`SignalingAction`]s for the session driver.
pub struct SignalingSession {
    call_id: CallId,
    local: UserId,
    remote: UserId,
    kind: CallKind,
    phase: CallPhase,
    local_sdp: Option<String>,
    remote_sdp: Option<String>,
    /// Candidates that arrived before the remote description was applied.
    queued_candidates: Vec<String>,
    remote_applied: bool,
    offer_sent: bool,
}

impl SignalingSession {
    /// Caller side, starting in `Idle`.
    pub fn new(call_id: CallId, local: UserId, remote: UserId, kind: CallKind) -> Self {
        Self {
            call_id,
            local,
            remote,
            kind,
            phase: CallPhase::Idle,
            local_sdp: None,
            remote_sdp: None,
            queued_candidates: Vec::new(),
            remote_applied: false,
            offer_sent: false,
        }
    }

    /// Callee side, built from an inbound offer. Starts in `Ringing` with
    /// the remote description stored but not yet applied.
    pub fn from_offer(local: UserId, signal: &CallSignal) -> Result<Self, SignalingError> {
        if signal.to != local {
            return Err(SignalingError::WrongRecipient);
        }
        let (sdp, media) = match &signal.kind {
            SignalKind::Offer { sdp, media } => (sdp.clone(), *media),
            _ => return Err(SignalingError::NotAnOffer),
        };

        debug!(call = %signal.call_id, from = %signal.from.short(), "Ringing on inbound offer");

        Ok(Self {
            call_id: signal.call_id,
            local,
            remote: signal.from,
            kind: media,
            phase: CallPhase::Ringing,
            local_sdp: None,
            remote_sdp: Some(sdp),
            queued_candidates: Vec::new(),
            remote_applied: false,
            offer_sent: false,
        })
    }

    /// Produce the one offer of this call attempt. `Idle` → `Offering`.
    pub fn offer(&mut self, sdp: String) -> Result<CallSignal, SignalingError> {
        if self.offer_sent || self.phase != CallPhase::Idle {
            return Err(SignalingError::OfferAlreadySent);
        }
        self.offer_sent = true;
        self.local_sdp = Some(sdp.clone());
        self.phase = CallPhase::Offering;
        debug!(call = %self.call_id, remote = %self.remote.short(), "Creating SDP offer");

        Ok(CallSignal::offer(
            self.call_id,
            self.local,
            self.remote,
            sdp,
            self.kind,
        ))
    }

    /// Produce the one answer of this call. `Ringing` → `Connected`.
    ///
    /// The answering peer connection is created with the remote offer
    /// already applied, so candidate delivery starts immediately.
    pub fn answer(&mut self, sdp: String) -> Result<CallSignal, SignalingError> {
        if self.phase != CallPhase::Ringing {
            return Err(SignalingError::NotRinging);
        }
        self.local_sdp = Some(sdp.clone());
        self.phase = CallPhase::Connected;
        self.remote_applied = true;
        debug!(call = %self.call_id, remote = %self.remote.short(), "Creating SDP answer");

        Ok(CallSignal::answer(self.call_id, self.local, self.remote, sdp))
    }

    /// Wrap a locally gathered ICE candidate for the wire.
    pub fn candidate(&self, candidate: String) -> CallSignal {
        CallSignal::ice_candidate(self.call_id, self.local, self.remote, candidate)
    }

    /// Handle one inbound signal from the call channel.
    pub fn handle(&mut self, signal: &CallSignal) -> SignalingAction {
        if signal.call_id != self.call_id || signal.from == self.local {
            return SignalingAction::Ignore;
        }

        match &signal.kind {
            SignalKind::Offer { .. } => {
                // A session already exists for this call; a replayed offer
                // carries nothing new.
                debug!(call = %self.call_id, "Ignoring duplicate offer");
                SignalingAction::Ignore
            }
            SignalKind::Answer { sdp } => {
                if self.phase != CallPhase::Offering {
                    debug!(call = %self.call_id, phase = ?self.phase, "Ignoring out-of-sequence answer");
                    return SignalingAction::Ignore;
                }
                self.remote_sdp = Some(sdp.clone());
                self.phase = CallPhase::Connected;
                debug!(call = %self.call_id, from = %signal.from.short(), "Received SDP answer");
                SignalingAction::ApplyRemoteDescription(sdp.clone())
            }
            SignalKind::IceCandidate { candidate } => {
                if self.phase == CallPhase::Terminated {
                    return SignalingAction::Ignore;
                }
                if self.remote_applied {
                    SignalingAction::ApplyCandidate(candidate.clone())
                } else {
                    debug!(call = %self.call_id, "Queueing early ICE candidate");
                    self.queued_candidates.push(candidate.clone());
                    SignalingAction::Ignore
                }
            }
            SignalKind::EndCall => {
                if self.phase == CallPhase::Terminated {
                    return SignalingAction::Ignore;
                }
                self.phase = CallPhase::Terminated;
                debug!(call = %self.call_id, from = %signal.from.short(), "Received hangup");
                SignalingAction::Close
            }
        }
    }

    /// Record that the remote description reached the peer connection and
    /// drain every candidate queued while it was pending.
    pub fn mark_remote_applied(&mut self) -> Vec<String> {
        self.remote_applied = true;
        std::mem::take(&mut self.queued_candidates)
    }

    /// Local hangup. Returns the `EndCall` signal to broadcast, or `None`
    /// when the call is already terminated (nothing further to send).
    pub fn hangup(&mut self) -> Option<CallSignal> {
        if self.phase == CallPhase::Terminated {
            return None;
        }
        self.phase = CallPhase::Terminated;
        Some(CallSignal::end_call(self.call_id, self.local, self.remote))
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn remote(&self) -> UserId {
        self.remote
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn remote_sdp(&self) -> Option<&str> {
        self.remote_sdp.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller_session() -> SignalingSession {
        SignalingSession::new(CallId::new(), UserId::new(), UserId::new(), CallKind::Video)
    }

    #[test]
    fn test_offer_answer_flow() {
        let mut caller = caller_session();
        let offer = caller.offer("offer-sdp".into()).unwrap();
        assert_eq!(caller.phase(), CallPhase::Offering);

        let mut callee = SignalingSession::from_offer(offer.to, &offer).unwrap();
        assert_eq!(callee.phase(), CallPhase::Ringing);
        assert_eq!(callee.kind(), CallKind::Video);
        assert_eq!(callee.remote_sdp(), Some("offer-sdp"));

        let answer = callee.answer("answer-sdp".into()).unwrap();
        assert_eq!(callee.phase(), CallPhase::Connected);

        match caller.handle(&answer) {
            SignalingAction::ApplyRemoteDescription(sdp) => assert_eq!(sdp, "answer-sdp"),
            other => panic!("Unexpected action: {other:?}"),
        }
        assert_eq!(caller.phase(), CallPhase::Connected);
    }

    #[test]
    fn test_exactly_one_offer() {
        let mut caller = caller_session();
        caller.offer("sdp".into()).unwrap();
        assert!(caller.offer("sdp-again".into()).is_err());
    }

    #[test]
    fn test_early_candidates_are_queued_until_remote_applied() {
        let mut caller = caller_session();
        let offer = caller.offer("offer".into()).unwrap();
        let remote = offer.to;

        let early = CallSignal::ice_candidate(caller.call_id(), remote, offer.from, "c1".into());
        assert_eq!(caller.handle(&early), SignalingAction::Ignore);

        let answer = CallSignal::answer(caller.call_id(), remote, offer.from, "answer".into());
        assert!(matches!(
            caller.handle(&answer),
            SignalingAction::ApplyRemoteDescription(_)
        ));

        assert_eq!(caller.mark_remote_applied(), vec!["c1".to_string()]);

        // Later candidates apply immediately.
        let late = CallSignal::ice_candidate(caller.call_id(), remote, offer.from, "c2".into());
        assert_eq!(
            caller.handle(&late),
            SignalingAction::ApplyCandidate("c2".into())
        );
    }

    #[test]
    fn test_own_echo_and_foreign_call_ignored() {
        let mut caller = caller_session();
        let offer = caller.offer("offer".into()).unwrap();

        // Broadcast channels echo own sends back.
        assert_eq!(caller.handle(&offer), SignalingAction::Ignore);

        let foreign = CallSignal::end_call(CallId::new(), offer.to, offer.from);
        assert_eq!(caller.handle(&foreign), SignalingAction::Ignore);
        assert_ne!(caller.phase(), CallPhase::Terminated);
    }

    #[test]
    fn test_remote_hangup_then_local_hangup_sends_nothing() {
        let mut caller = caller_session();
        let offer = caller.offer("offer".into()).unwrap();

        let end = CallSignal::end_call(caller.call_id(), offer.to, offer.from);
        assert_eq!(caller.handle(&end), SignalingAction::Close);
        assert_eq!(caller.phase(), CallPhase::Terminated);

        // No echo loop: hangup after remote hangup has nothing to send.
        assert!(caller.hangup().is_none());
    }

    #[test]
    fn test_answer_requires_ringing() {
        let mut caller = caller_session();
        assert!(caller.answer("sdp".into()).is_err());
    }

    #[test]
    fn test_from_offer_rejects_wrong_recipient() {
        let mut caller = caller_session();
        let offer = caller.offer("offer".into()).unwrap();
        assert!(SignalingSession::from_offer(UserId::new(), &offer).is_err());
    }
}
