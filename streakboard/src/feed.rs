//! Change-feed contract and an in-process implementation.
//!
//! A [`ChangeFeed`] hands out one [`FeedSubscription`] per user session.
//! Subscriptions yield postcard-encoded [`ChangeEvent`] frames and may end
//! or go quiet at any time; the consumer is expected to notice either and
//! fall back to polling (see [`crate::sync::live`]).
//!
//! [`LocalFeed`] is a channel-backed hub used by the in-memory store, the
//! demo binary and the tests. It enforces a subscriber quota and can be
//! switched off to simulate an outage.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use streakboard_proto::event::{self, ChangeEvent};
use streakboard_proto::task::UserId;

/// Errors that can occur when subscribing to a change feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Too many live subscriptions.
    #[error("subscription quota exceeded (max {max})")]
    QuotaExceeded {
        /// Configured maximum number of subscriptions.
        max: usize,
    },

    /// The feed service is not accepting subscriptions.
    #[error("change feed unavailable: {0}")]
    Unavailable(String),
}

/// Stream of encoded change-event frames for one user.
pub struct FeedSubscription {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl FeedSubscription {
    /// Wraps a receiver of encoded frames.
    #[must_use]
    pub const fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Waits for the next frame. Returns `None` once the feed has ended.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Source of change notifications for a user's tasks.
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription for `user`.
    fn subscribe(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<FeedSubscription, FeedError>> + Send;
}

struct Subscriber {
    user: UserId,
    tx: mpsc::Sender<Vec<u8>>,
}

struct FeedInner {
    subscribers: Mutex<Vec<Subscriber>>,
    available: Mutex<bool>,
    max_subscribers: usize,
    buffer: usize,
}

/// In-process change feed. Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct LocalFeed {
    inner: Arc<FeedInner>,
}

impl LocalFeed {
    /// Creates a feed whose subscriptions buffer up to `buffer` frames and
    /// which accepts at most `max_subscribers` live subscriptions.
    #[must_use]
    pub fn new(buffer: usize, max_subscribers: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                subscribers: Mutex::new(Vec::new()),
                available: Mutex::new(true),
                max_subscribers,
                buffer: buffer.max(1),
            }),
        }
    }

    /// Encodes `event` and delivers it to every subscription of `user`.
    ///
    /// A subscription whose buffer is full is dropped rather than silently
    /// losing the frame, so its consumer sees the stream end.
    pub fn publish(&self, user: &UserId, event: &ChangeEvent) {
        match event::encode(event) {
            Ok(frame) => self.publish_frame(user, &frame),
            Err(e) => tracing::warn!(err = %e, "failed to encode change event"),
        }
    }

    /// Delivers a raw frame to every subscription of `user`.
    pub fn publish_frame(&self, user: &UserId, frame: &[u8]) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|sub| {
            if sub.user != *user {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(frame.to_vec()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(user_id = %sub.user, "subscriber buffer full, dropping subscription");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Ends every live subscription.
    pub fn disconnect_all(&self) {
        let dropped = std::mem::take(&mut *self.inner.subscribers.lock());
        tracing::info!(count = dropped.len(), "change feed subscriptions dropped");
    }

    /// Accept or refuse new subscriptions.
    pub fn set_available(&self, available: bool) {
        *self.inner.available.lock() = available;
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|sub| !sub.tx.is_closed());
        subscribers.len()
    }

    fn open(&self, user: &UserId) -> Result<FeedSubscription, FeedError> {
        if !*self.inner.available.lock() {
            return Err(FeedError::Unavailable("feed is offline".to_string()));
        }
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|sub| !sub.tx.is_closed());
        if subscribers.len() >= self.inner.max_subscribers {
            return Err(FeedError::QuotaExceeded {
                max: self.inner.max_subscribers,
            });
        }
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        subscribers.push(Subscriber {
            user: user.clone(),
            tx,
        });
        tracing::debug!(user_id = %user, live = subscribers.len(), "change feed subscription opened");
        Ok(FeedSubscription::new(rx))
    }
}

impl ChangeFeed for LocalFeed {
    async fn subscribe(&self, user: &UserId) -> Result<FeedSubscription, FeedError> {
        self.open(user)
    }
}
