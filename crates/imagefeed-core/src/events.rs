use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Changes published by the photo feed cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    /// The list changed as a whole (page appended or feed cleared); observers re-diff.
    Changed,
    /// A single photo was replaced in place.
    PhotoUpdated { index: usize },
}

/// Changes published by the profile services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    AvatarChanged { url: String },
}

/// Typed publish/subscribe channel shared by the caches.
///
/// Publishing never blocks and succeeds without subscribers. A subscriber that
/// falls more than the channel capacity behind observes `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: E) {
        // No receivers is not an error for a cache.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
