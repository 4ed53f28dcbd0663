//! Frame fan-out.
//!
//! Uses a [`tokio::sync::broadcast`] channel so every connected dashboard
//! receives every frame without a slow browser holding back the others.  A
//! subscriber that falls behind sees `RecvError::Lagged` and simply resumes
//! with the newest frames; only the latest frame matters to a live view.
//!
//! The bus also keeps the most recently published frame so that a client
//! connecting between ticks can be served immediately.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::trace;

use crate::render::DashboardFrame;

/// Default channel capacity (number of buffered frames before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 16;

/// Shared frame bus.  Clone it cheaply – all clones share the same channel
/// and snapshot.
#[derive(Clone, Debug)]
pub struct FrameBus {
    sender: broadcast::Sender<Arc<DashboardFrame>>,
    latest: Arc<RwLock<Option<Arc<DashboardFrame>>>>,
}

impl FrameBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Publish `frame` to every subscriber and remember it as the latest.
    ///
    /// Returns the number of subscribers that were handed the frame; having
    /// none is a normal condition (no browser open).
    pub fn publish(&self, frame: Arc<DashboardFrame>) -> usize {
        {
            let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
            *latest = Some(Arc::clone(&frame));
        }
        let delivered = self.sender.send(frame).unwrap_or(0);
        trace!(delivered, "frame published");
        delivered
    }

    /// Subscribe to all frames published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DashboardFrame>> {
        self.sender.subscribe()
    }

    /// The most recently published frame, if any.
    pub fn latest(&self) -> Option<Arc<DashboardFrame>> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The most recent frame, or an empty one before the first refresh.
    pub fn latest_or_empty(&self) -> Arc<DashboardFrame> {
        self.latest()
            .unwrap_or_else(|| Arc::new(DashboardFrame::empty()))
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = FrameBus::default();
        assert_eq!(bus.publish(Arc::new(DashboardFrame::empty())), 0);
        assert!(bus.latest().is_some());
    }

    #[test]
    fn latest_or_empty_before_first_publish() {
        let bus = FrameBus::default();
        assert!(bus.latest().is_none());
        assert!(bus.latest_or_empty().is_empty());
    }

    #[tokio::test]
    async fn subscriber_receives_published_frame() {
        let bus = FrameBus::default();
        let mut rx = bus.subscribe();
        let frame = Arc::new(DashboardFrame::empty());
        assert_eq!(bus.publish(Arc::clone(&frame)), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, frame.id);
        assert_eq!(bus.latest().unwrap().id, frame.id);
    }

    #[tokio::test]
    async fn clones_share_the_channel() {
        let bus = FrameBus::default();
        let clone = bus.clone();
        let mut rx = clone.subscribe();
        bus.publish(Arc::new(DashboardFrame::empty()));
        assert!(rx.recv().await.is_ok());
        assert!(clone.latest().is_some());
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = FrameBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(Arc::new(DashboardFrame::empty()));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
