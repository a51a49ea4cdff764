//! Named broadcast channels for ephemeral signaling payloads.
//!
//! A broadcast channel carries short-lived messages (call signals, typing
//! pings) between the clients subscribed to the same channel name. Nothing
//! is persisted or replayed: a subscriber only sees messages sent after it
//! joined, which is why call channels are subscribed before the first send.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use confide_shared::constants::SIGNAL_CHANNEL_CAPACITY;
use confide_shared::TransportError;

/// Registry of live channels, shared by every handle of one backend.
pub(crate) type ChannelRegistry = Arc<Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>>;

/// Handle to one named broadcast channel, typed by its payload.
///
/// The payload travels as a bincode envelope; malformed frames are logged
/// and skipped per the protocol-error policy, never surfaced as failures.
pub struct BroadcastChannel<T> {
    name: String,
    tx: broadcast::Sender<Vec<u8>>,
    rx: broadcast::Receiver<Vec<u8>>,
    _payload: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> BroadcastChannel<T> {
    /// Open (joining or creating) the named channel in a registry.
    pub(crate) fn open(registry: &ChannelRegistry, name: &str) -> Self {
        let mut channels = registry.lock().unwrap_or_else(|e| e.into_inner());
        let tx = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(SIGNAL_CHANNEL_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();
        debug!(channel = %name, "Opened broadcast channel");

        Self {
            name: name.to_string(),
            tx,
            rx,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A clonable send-only handle to the same channel, for senders that
    /// outlive or sit apart from the receiving loop.
    pub fn sender(&self) -> BroadcastSender<T> {
        BroadcastSender {
            name: self.name.clone(),
            tx: self.tx.clone(),
            _payload: PhantomData,
        }
    }

    /// Send a payload to every current subscriber.
    ///
    /// Having no subscribers is not an error: broadcast delivery is
    /// best-effort by contract (e.g. the hangup notice after the remote
    /// peer already left).
    pub fn send(&self, payload: &T) -> Result<(), TransportError> {
        let bytes =
            bincode::serialize(payload).map_err(|e| TransportError::Codec(e.to_string()))?;

        if self.tx.send(bytes).is_err() {
            debug!(channel = %self.name, "Broadcast had no subscribers");
        }
        Ok(())
    }

    /// Wait for the next payload. Returns `None` once the channel is gone.
    ///
    /// Own sends are delivered too; callers filter by sender id where that
    /// matters.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(bytes) => match bincode::deserialize(&bytes) {
                    Ok(payload) => return Some(payload),
                    Err(e) => {
                        warn!(channel = %self.name, error = %e, "Dropping malformed broadcast frame");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.name, skipped, "Broadcast receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Send-only handle to a broadcast channel.
pub struct BroadcastSender<T> {
    name: String,
    tx: broadcast::Sender<Vec<u8>>,
    _payload: PhantomData<T>,
}

impl<T> Clone for BroadcastSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T: Serialize> BroadcastSender<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Best-effort send, same semantics as [`BroadcastChannel::send`].
    pub fn send(&self, payload: &T) -> Result<(), TransportError> {
        let bytes =
            bincode::serialize(payload).map_err(|e| TransportError::Codec(e.to_string()))?;
        if self.tx.send(bytes).is_err() {
            debug!(channel = %self.name, "Broadcast had no subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confide_shared::protocol::{CallSignal, SignalKind};
    use confide_shared::{CallId, UserId};

    fn new_registry() -> ChannelRegistry {
        Arc::new(Mutex::new(HashMap::new()))
    }

    #[tokio::test]
    async fn test_send_recv_across_handles() {
        let registry = new_registry();
        let call_id = CallId::new();
        let name = call_id.to_channel();

        let a: BroadcastChannel<CallSignal> = BroadcastChannel::open(&registry, &name);
        let mut b: BroadcastChannel<CallSignal> = BroadcastChannel::open(&registry, &name);

        let signal = CallSignal::end_call(call_id, UserId::new(), UserId::new());
        a.send(&signal).unwrap();

        let received = b.recv().await.unwrap();
        assert_eq!(received.call_id, call_id);
        assert_eq!(received.kind, SignalKind::EndCall);
    }

    #[tokio::test]
    async fn test_send_without_subscribers_is_ok() {
        let registry = new_registry();
        let a: BroadcastChannel<u32> = BroadcastChannel::open(&registry, "lonely");
        assert!(a.send(&7).is_ok());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let registry = new_registry();
        let a: BroadcastChannel<CallSignal> = BroadcastChannel::open(&registry, "calls");
        let mut b: BroadcastChannel<CallSignal> = BroadcastChannel::open(&registry, "calls");

        // Raw garbage on the wire, then a valid frame.
        a.tx.send(vec![0xff, 0x00, 0x13]).unwrap();
        let valid = CallSignal::end_call(CallId::new(), UserId::new(), UserId::new());
        a.send(&valid).unwrap();

        assert_eq!(b.recv().await.unwrap(), valid);
    }
}
