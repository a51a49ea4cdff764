//! Change-feed subscriptions.
//!
//! A subscription delivers row-level insert/update/delete events for one
//! table, already filtered and reshaped into the typed row model at the
//! transport boundary. Within one subscription, events arrive in
//! server-commit order; no ordering is guaranteed across subscriptions.

use tokio::sync::mpsc;

use confide_shared::constants::FEED_CHANNEL_CAPACITY;

/// One row-level event from a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R> {
    Insert(R),
    Update(R),
    Delete(R),
}

impl<R> ChangeEvent<R> {
    /// The row the event carries, whichever the event kind.
    pub fn row(&self) -> &R {
        match self {
            Self::Insert(r) | Self::Update(r) | Self::Delete(r) => r,
        }
    }
}

/// Receiving half of a change-feed subscription.
///
/// Dropping (or explicitly closing) the subscription is the unsubscribe:
/// the backend stops delivering as soon as the channel closes. Engines
/// must drop their subscription when their owning scope is deactivated.
pub struct FeedSubscription<R> {
    rx: mpsc::Receiver<ChangeEvent<R>>,
}

impl<R> FeedSubscription<R> {
    /// Wrap a receiver produced by a backend adapter.
    pub fn new(rx: mpsc::Receiver<ChangeEvent<R>>) -> Self {
        Self { rx }
    }

    /// Create a connected (sender, subscription) pair. Backends push
    /// filtered events into the sender.
    pub fn channel() -> (mpsc::Sender<ChangeEvent<R>>, Self) {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        (tx, Self { rx })
    }

    /// Wait for the next event. Returns `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent<R>> {
        self.rx.recv().await
    }

    /// Explicitly unsubscribe. Subsequent `recv` calls drain buffered
    /// events and then return `None`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_and_close() {
        let (tx, mut sub) = FeedSubscription::<u32>::channel();

        tx.send(ChangeEvent::Insert(1)).await.unwrap();
        tx.send(ChangeEvent::Delete(1)).await.unwrap();

        assert_eq!(sub.recv().await, Some(ChangeEvent::Insert(1)));
        sub.close();

        // Buffered events drain, then the feed ends.
        assert_eq!(sub.recv().await, Some(ChangeEvent::Delete(1)));
        assert_eq!(sub.recv().await, None);
        assert!(tx.is_closed());
    }
}
