//! Notification dispatcher.
//!
//! Consumes inserts on the local user's notification feed and presents
//! each at most once: an in-app toast while the app is foregrounded, a
//! native notification (permission permitting) while backgrounded.
//! Preference suppression happens here, at presentation time; the rows
//! themselves are always delivered and stored.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use confide_shared::constants::{APP_NAME, NOTIFICATION_DEDUP_CAPACITY, TOAST_DURATION_MS};
use confide_shared::{Notification, NotificationId, PreferenceCategory, UserId};
use confide_transport::{ChangeEvent, FeedSubscription};

use crate::events::{AppEvent, EventBus, NavigationTarget, Toast};

/// Per-category notification preferences, read at presentation time.
pub trait NotificationPreferences: Send + Sync {
    fn enabled(&self, user: UserId, category: PreferenceCategory) -> bool;
}

/// Device-local preference rows. A read failure falls back to enabled;
/// losing a notification over a storage hiccup is the worse outcome.
impl NotificationPreferences for Arc<Mutex<confide_store::Database>> {
    fn enabled(&self, user: UserId, category: PreferenceCategory) -> bool {
        let db = self.lock().unwrap_or_else(|e| e.into_inner());
        match db.category_enabled(user, category) {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(error = %e, "Preference read failed, treating as enabled");
                true
            }
        }
    }
}

/// Preferences source that never suppresses anything.
pub struct AlwaysEnabled;

impl NotificationPreferences for AlwaysEnabled {
    fn enabled(&self, _user: UserId, _category: PreferenceCategory) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
}

/// Platform native-notification surface.
pub trait NativeNotifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;
    fn show(&self, title: &str, body: &str, target: Option<&NavigationTarget>);
}

/// Shared foreground/background flag, flipped by the app shell on
/// lifecycle transitions.
#[derive(Clone)]
pub struct Visibility(Arc<AtomicBool>);

impl Visibility {
    pub fn foregrounded() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn backgrounded() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.0.store(foreground, Ordering::SeqCst);
    }

    pub fn is_foreground(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded memory of recently dispatched ids. When full, the oldest id
/// is evicted first, so a redelivery of a recent id stays suppressed.
struct RecentIds {
    capacity: usize,
    order: VecDeque<NotificationId>,
    seen: HashSet<NotificationId>,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Remember `id`. Returns `false` when it was already remembered.
    fn insert(&mut self, id: NotificationId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

pub struct NotificationDispatcher {
    shutdown_tx: mpsc::Sender<()>,
}

impl NotificationDispatcher {
    /// Spawn the dispatch loop over the local user's notification feed.
    pub fn start(
        user: UserId,
        feed: FeedSubscription<Notification>,
        preferences: Arc<dyn NotificationPreferences>,
        visibility: Visibility,
        notifier: Arc<dyn NativeNotifier>,
        bus: EventBus,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(dispatch_loop(
            user,
            feed,
            preferences,
            visibility,
            notifier,
            bus,
            shutdown_rx,
        ));
        Self { shutdown_tx }
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn dispatch_loop(
    user: UserId,
    mut feed: FeedSubscription<Notification>,
    preferences: Arc<dyn NotificationPreferences>,
    visibility: Visibility,
    notifier: Arc<dyn NativeNotifier>,
    bus: EventBus,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut seen = RecentIds::new(NOTIFICATION_DEDUP_CAPACITY);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,

            event = feed.recv() => {
                let Some(event) = event else {
                    debug!("Notification feed closed");
                    break;
                };
                // Read flips and deletions never re-present.
                let ChangeEvent::Insert(notification) = event else {
                    continue;
                };

                if !seen.insert(notification.id) {
                    debug!(id = %notification.id, "Duplicate notification suppressed");
                    continue;
                }

                if let Some(category) = category_for_kind(&notification.kind) {
                    if !preferences.enabled(user, category) {
                        debug!(id = %notification.id, kind = %notification.kind, "Suppressed by preference");
                        continue;
                    }
                }

                present(&notification, &visibility, notifier.as_ref(), &bus);
            }
        }
    }
}

fn present(
    notification: &Notification,
    visibility: &Visibility,
    notifier: &dyn NativeNotifier,
    bus: &EventBus,
) {
    let (title, body) = render(notification);
    let target = navigation_target(notification);

    if visibility.is_foreground() {
        bus.emit(AppEvent::Toast(Toast {
            notification_id: notification.id,
            title,
            body,
            duration_ms: TOAST_DURATION_MS,
            target,
        }));
    } else if notifier.permission() == NotificationPermission::Granted {
        notifier.show(&title, &body, target.as_ref());
    } else {
        debug!(id = %notification.id, "Backgrounded without permission, skipped");
    }
}

/// Title and body for one notification row. Unknown kinds fall back to
/// the app name so nothing is dropped on a client older than the server.
fn render(notification: &Notification) -> (String, String) {
    let title = match notification.kind.as_str() {
        "message" => "New message",
        "mention" => "You were mentioned",
        "community_mention" => "Mentioned in a community",
        "reply" => "New reply",
        "reaction" => "New reaction",
        "comment" => "New comment",
        "follow" => "You have a new fan",
        "verification" => "Account verified",
        _ => APP_NAME,
    };
    (title.to_string(), notification.content.clone())
}

/// Which preference category gates a kind. Kinds outside the three
/// toggled classes are never suppressed.
fn category_for_kind(kind: &str) -> Option<PreferenceCategory> {
    match kind {
        "message" => Some(PreferenceCategory::Messages),
        "mention" | "community_mention" => Some(PreferenceCategory::Mentions),
        "reply" => Some(PreferenceCategory::Replies),
        _ => None,
    }
}

/// Where clicking the notification navigates.
fn navigation_target(notification: &Notification) -> Option<NavigationTarget> {
    let related = notification.related_id?;
    match notification.kind.as_str() {
        "message" => Some(NavigationTarget::Chat(UserId(related))),
        "mention" | "reply" | "reaction" | "comment" => {
            Some(NavigationTarget::Confession(related))
        }
        "community_mention" => Some(NavigationTarget::Community(related)),
        "follow" => Some(NavigationTarget::Profile(UserId(related))),
        _ => None,
    }
}
