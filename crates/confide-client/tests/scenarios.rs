//! End-to-end scenarios over the in-memory transport: two clients sharing
//! one backend, each running the real engines.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use confide_call::{
    loopback::LoopbackConnector,
    media::NullMediaSource,
    signaling::CallPhase,
    CallEvent, CallSession,
};
use confide_client::{AppEvent, ConversationSync, EventBus, ReadReceiptTracker, UnreadTracker};
use confide_shared::protocol::CallSignal;
use confide_shared::{CallId, CallKind, ConversationKey, Message, MessageId, UserId};
use confide_transport::MemoryBackend;

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}

async fn next_app_event(rx: &mut mpsc::Receiver<AppEvent>) -> AppEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("app event timed out")
        .expect("bus closed")
}

// Scenario: A sends a text message; B's activated sync engine appends
// exactly one entry without a manual refresh.
#[tokio::test]
async fn two_party_chat_delivers_live() {
    let backend = MemoryBackend::new();
    let store = backend.message_store();
    let (alice, bob) = (UserId::new(), UserId::new());
    let key = ConversationKey::new(alice, bob);

    let (bus, mut events) = EventBus::channel();
    let sync = ConversationSync::activate(
        key,
        store.clone(),
        backend.subscribe_messages(|_| true),
        bus,
    )
    .await
    .unwrap();
    assert!(sync.messages().is_empty());

    let sent = Message::text(alice, bob, "I have something to confess");
    store.insert(sent.clone()).await.unwrap();

    match next_app_event(&mut events).await {
        AppEvent::MessageReceived { message, .. } => {
            assert_eq!(message.id, sent.id);
            assert_eq!(message.content, "I have something to confess");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    let cached = sync.messages();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, sent.id);

    sync.deactivate().await;
}

// Scenario: full call lifecycle. A offers video, B rings and answers,
// both connect, A hangs up, both terminate.
#[tokio::test]
async fn call_lifecycle_connects_and_terminates() {
    let backend = MemoryBackend::new();
    let (alice, bob) = (UserId::new(), UserId::new());
    let call_id = CallId::new();

    let mut bob_inbox = backend.broadcast::<CallSignal>(&call_id.to_channel());
    let alice_channel = backend.broadcast::<CallSignal>(&call_id.to_channel());

    let alice_connector = LoopbackConnector::new();
    let (alice_call, _alice_events) = CallSession::initialize(
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
    assert_eq!(alice_call.phase(), CallPhase::Offering);

    let offer = timeout(Duration::from_secs(2), bob_inbox.recv())
        .await
        .unwrap()
        .unwrap();

    let bob_connector = LoopbackConnector::new();
    let (bob_call, mut bob_events) = CallSession::answer(
        bob_inbox,
        &NullMediaSource,
        &bob_connector,
        bob,
        &offer,
    )
    .await
    .unwrap();
    assert_eq!(bob_call.phase(), CallPhase::Connected);

    wait_until("caller to connect", || {
        alice_call.phase() == CallPhase::Connected
    })
    .await;

    alice_call.end().await;
    assert_eq!(alice_call.phase(), CallPhase::Terminated);

    wait_until("callee to terminate", || {
        bob_call.phase() == CallPhase::Terminated
    })
    .await;
    loop {
        match timeout(Duration::from_secs(2), bob_events.recv())
            .await
            .unwrap()
        {
            Some(CallEvent::Ended { call_id: ended }) => {
                assert_eq!(ended, call_id);
                break;
            }
            Some(_) => continue,
            None => panic!("callee never observed the end of the call"),
        }
    }
}

// Scenario: three unread messages from X, then markAsRead(X); the counter
// is absent immediately, before any feed echo.
#[tokio::test]
async fn mark_as_read_clears_counter_synchronously() {
    let backend = MemoryBackend::new();
    let store = backend.message_store();
    let me = UserId::new();
    let x = UserId::new();

    let (bus, _events) = EventBus::channel();
    let tracker = UnreadTracker::start(
        me,
        store.clone(),
        backend.subscribe_messages(|_| true),
        bus,
    )
    .await
    .unwrap();

    for content in ["one", "two", "three"] {
        store.insert(Message::text(x, me, content)).await.unwrap();
    }
    wait_until("three unread", || tracker.unread_from(x) == 3).await;

    tracker.mark_as_read(x).await.unwrap();
    assert!(!tracker.counts().contains_key(&x));

    // The server flips echo back as updates; the counter must stay clear.
    sleep(Duration::from_millis(50)).await;
    assert!(!tracker.counts().contains_key(&x));
    assert!(store.unread_messages(me).await.unwrap().is_empty());
}

// Scenario: three distinct readers mark one community message; the count
// is 3, and a repeat mark from one of them leaves it at 3.
#[tokio::test]
async fn community_read_count_is_per_distinct_reader() {
    let backend = MemoryBackend::new();
    let message = MessageId::new();

    let readers: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
    let mut trackers = Vec::new();
    for reader in &readers {
        let tracker = ReadReceiptTracker::start(
            *reader,
            backend.receipt_store(),
            backend.subscribe_receipts(|_| true),
            vec![message],
        )
        .await
        .unwrap();
        trackers.push(tracker);
    }

    for tracker in &trackers {
        tracker.mark_message_as_read(message).await.unwrap();
    }
    for tracker in &trackers {
        wait_until("count to reach 3", || tracker.count_for(message) == 3).await;
    }

    // Fourth mark from an existing reader changes nothing.
    trackers[0].mark_message_as_read(message).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    for tracker in &trackers {
        assert_eq!(tracker.count_for(message), 3);
    }
}
