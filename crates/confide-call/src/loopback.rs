//! In-process peer connections for tests and simulations.
//!
//! [`LoopbackConnector`] fabricates SDP blobs and ICE candidates without
//! touching any network or device. Candidate trickle starts once the
//! connection knows the remote description, matching real gathering
//! behavior closely enough to exercise the signaling paths.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use confide_shared::CallKind;

use crate::peer::{
    PeerConnection, PeerConnectionState, PeerConnector, PeerError, PeerEvent, PeerSetup,
    RemoteStream,
};

const PEER_EVENT_CAPACITY: usize = 32;

pub struct LoopbackConnection {
    state: Mutex<PeerConnectionState>,
    remote_sdp: Mutex<Option<String>>,
    applied_candidates: Mutex<Vec<String>>,
    /// Candidates emitted once the remote description lands.
    trickle: Mutex<Vec<String>>,
    events_tx: Mutex<Option<mpsc::Sender<PeerEvent>>>,
    kind: CallKind,
}

impl LoopbackConnection {
    fn new(kind: CallKind, trickle: Vec<String>) -> (Arc<Self>, mpsc::Receiver<PeerEvent>) {
        let (tx, rx) = mpsc::channel(PEER_EVENT_CAPACITY);
        let conn = Arc::new(Self {
            state: Mutex::new(PeerConnectionState::New),
            remote_sdp: Mutex::new(None),
            applied_candidates: Mutex::new(Vec::new()),
            trickle: Mutex::new(trickle),
            events_tx: Mutex::new(Some(tx)),
            kind,
        });
        (conn, rx)
    }

    async fn emit(&self, event: PeerEvent) {
        let tx = self
            .events_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// Trickle queued candidates and report the connection as up.
    async fn go_live(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = PeerConnectionState::Connected;

        let pending =
            std::mem::take(&mut *self.trickle.lock().unwrap_or_else(|e| e.into_inner()));
        for candidate in pending {
            self.emit(PeerEvent::IceCandidate(candidate)).await;
        }
        self.emit(PeerEvent::StateChanged(PeerConnectionState::Connected))
            .await;
        self.emit(PeerEvent::RemoteStream(RemoteStream {
            stream_id: format!("stream-{}", Uuid::new_v4()),
            kind: self.kind,
        }))
        .await;
    }

    pub fn remote_description(&self) -> Option<String> {
        self.remote_sdp
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.applied_candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn set_remote_description(&self, sdp: &str) -> Result<(), PeerError> {
        if sdp.is_empty() {
            return Err(PeerError::InvalidDescription("empty sdp".into()));
        }
        *self.remote_sdp.lock().unwrap_or_else(|e| e.into_inner()) = Some(sdp.to_string());
        self.go_live().await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), PeerError> {
        if candidate.is_empty() {
            return Err(PeerError::InvalidCandidate("empty candidate".into()));
        }
        self.applied_candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candidate.to_string());
        Ok(())
    }

    async fn close(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = PeerConnectionState::Closed;
        // Dropping the sender ends the event stream.
        self.events_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    fn state(&self) -> PeerConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Connector producing [`LoopbackConnection`]s. Keeps every connection it
/// created so tests can inspect applied candidates and descriptions.
pub struct LoopbackConnector {
    candidates_per_side: usize,
    connections: Mutex<Vec<Arc<LoopbackConnection>>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            candidates_per_side: 2,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn with_candidates(candidates_per_side: usize) -> Self {
        Self {
            candidates_per_side,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn connections(&self) -> Vec<Arc<LoopbackConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn fake_candidates(&self) -> Vec<String> {
        (0..self.candidates_per_side)
            .map(|i| format!("candidate:{i} udp 127.0.0.1 {}", 50_000 + i))
            .collect()
    }

    fn register(&self, conn: &Arc<LoopbackConnection>) {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(conn.clone());
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn create_offer(&self, kind: CallKind) -> Result<PeerSetup, PeerError> {
        let (conn, events) = LoopbackConnection::new(kind, self.fake_candidates());
        self.register(&conn);

        Ok(PeerSetup {
            local_sdp: format!("v=0 loopback-offer {}", Uuid::new_v4()),
            connection: conn,
            events,
        })
    }

    async fn create_answer(
        &self,
        kind: CallKind,
        remote_offer: &str,
    ) -> Result<PeerSetup, PeerError> {
        if remote_offer.is_empty() {
            return Err(PeerError::InvalidDescription("empty offer".into()));
        }
        let (conn, events) = LoopbackConnection::new(kind, self.fake_candidates());
        self.register(&conn);

        // The answering side knows the remote description from creation,
        // so it trickles immediately.
        *conn.remote_sdp.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(remote_offer.to_string());
        conn.go_live().await;

        Ok(PeerSetup {
            local_sdp: format!("v=0 loopback-answer {}", Uuid::new_v4()),
            connection: conn,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_side_trickles_after_remote_description() {
        let connector = LoopbackConnector::new();
        let mut setup = connector.create_offer(CallKind::Audio).await.unwrap();

        // Nothing gathered before the remote description.
        assert!(setup.events.try_recv().is_err());

        setup
            .connection
            .set_remote_description("v=0 answer")
            .await
            .unwrap();

        let mut candidates = 0;
        while let Some(event) = setup.events.recv().await {
            match event {
                PeerEvent::IceCandidate(_) => candidates += 1,
                PeerEvent::RemoteStream(_) => break,
                PeerEvent::StateChanged(_) => {}
            }
        }
        assert_eq!(candidates, 2);
        assert_eq!(setup.connection.state(), PeerConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_close_ends_event_stream() {
        let connector = LoopbackConnector::new();
        let mut setup = connector.create_offer(CallKind::Video).await.unwrap();

        setup.connection.close().await;
        assert_eq!(setup.connection.state(), PeerConnectionState::Closed);
        assert!(setup.events.recv().await.is_none());
    }
}
