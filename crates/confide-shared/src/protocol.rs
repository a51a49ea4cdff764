use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CallId, CallKind, ConversationKey, UserId};

/// A call-signaling message exchanged over the call-id-scoped broadcast
/// channel. Ephemeral: never persisted, meaningful only while the two
/// peers are negotiating or tearing down a call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSignal {
    pub call_id: CallId,
    pub from: UserId,
    pub to: UserId,
    pub kind: SignalKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalKind {
    /// SDP offer, opening the call. Carries the media kind so the callee
    /// can acquire the right devices before answering.
    Offer { sdp: String, media: CallKind },
    /// SDP answer.
    Answer { sdp: String },
    /// One ICE candidate, sent as soon as it is gathered.
    IceCandidate { candidate: String },
    /// Best-effort hangup notice so the remote peer can clean up too.
    EndCall,
}

impl CallSignal {
    pub fn offer(call_id: CallId, from: UserId, to: UserId, sdp: String, media: CallKind) -> Self {
        Self {
            call_id,
            from,
            to,
            kind: SignalKind::Offer { sdp, media },
        }
    }

    pub fn answer(call_id: CallId, from: UserId, to: UserId, sdp: String) -> Self {
        Self {
            call_id,
            from,
            to,
            kind: SignalKind::Answer { sdp },
        }
    }

    pub fn ice_candidate(call_id: CallId, from: UserId, to: UserId, candidate: String) -> Self {
        Self {
            call_id,
            from,
            to,
            kind: SignalKind::IceCandidate { candidate },
        }
    }

    pub fn end_call(call_id: CallId, from: UserId, to: UserId) -> Self {
        Self {
            call_id,
            from,
            to,
            kind: SignalKind::EndCall,
        }
    }
}

/// Ephemeral typing notice broadcast on the conversation channel.
/// Not persisted; receivers age it out on their own timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingPing {
    pub conversation: ConversationKey,
    pub user: UserId,
    pub sent_at: DateTime<Utc>,
}

impl TypingPing {
    pub fn new(conversation: ConversationKey, user: UserId) -> Self {
        Self {
            conversation,
            user,
            sent_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_signal_roundtrip() {
        let signal = CallSignal::offer(
            CallId::new(),
            UserId::new(),
            UserId::new(),
            "v=0 o=- 0 0 IN IP4 127.0.0.1".to_string(),
            CallKind::Video,
        );

        let bytes = bincode::serialize(&signal).unwrap();
        let restored: CallSignal = bincode::deserialize(&bytes).unwrap();

        assert_eq!(signal, restored);
        if let SignalKind::Offer { media, .. } = restored.kind {
            assert_eq!(media, CallKind::Video);
        } else {
            panic!("Signal kind mismatch");
        }
    }

    #[test]
    fn test_typing_ping_roundtrip() {
        let ping = TypingPing::new(
            ConversationKey::new(UserId::new(), UserId::new()),
            UserId::new(),
        );

        let bytes = bincode::serialize(&ping).unwrap();
        let restored: TypingPing = bincode::deserialize(&bytes).unwrap();
        assert_eq!(ping, restored);
    }
}
