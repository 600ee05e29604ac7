//! Live update delivery with polling fallback.
//!
//! [`LiveSync`] keeps exactly one update source active for a
//! [`TaskSynchronizer`]:
//!
//! - **Streaming**: frames from a [`ChangeFeed`] subscription are decoded
//!   and merged with [`TaskSynchronizer::apply_remote`].
//! - **Polling**: when the subscription cannot be opened, ends, or stays
//!   silent for `feed_idle_timeout`, the store is listed every
//!   `poll_interval` and merged with [`TaskSynchronizer::refresh`]. Each
//!   poll tick also tries to resubscribe; success switches back to
//!   streaming after one catch-up refresh.
//!
//! Both paths go through the same idempotent merge, so a duplicate event
//! or an overlapping poll never duplicates a task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use streakboard_proto::event;

use super::TaskSynchronizer;
use crate::feed::{ChangeFeed, FeedSubscription};
use crate::store::TaskStore;

/// Which source is currently driving updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// No subscription attempt has completed yet.
    Connecting,
    /// Change-feed events are being applied.
    Streaming,
    /// The feed is down; the store is polled periodically.
    Polling,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

/// Why a subscription stopped being used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// The feed closed the stream.
    Closed,
    /// No frame arrived within the idle timeout.
    Idle,
}

/// Single-active-source delivery loop for one synchronizer.
pub struct LiveSync<S: TaskStore, F: ChangeFeed> {
    sync: Arc<TaskSynchronizer<S>>,
    feed: F,
    poll_interval: Duration,
    idle_timeout: Duration,
    mode_tx: watch::Sender<DeliveryMode>,
}

impl<S: TaskStore, F: ChangeFeed> LiveSync<S, F> {
    /// Creates the loop; polling and feed liveness use the
    /// synchronizer's configured timings.
    pub fn new(sync: Arc<TaskSynchronizer<S>>, feed: F) -> Self {
        let poll_interval = sync.config().poll_interval;
        let idle_timeout = sync.config().feed_idle_timeout;
        let (mode_tx, _) = watch::channel(DeliveryMode::Connecting);
        Self {
            sync,
            feed,
            poll_interval,
            idle_timeout,
            mode_tx,
        }
    }

    /// Current delivery mode.
    #[must_use]
    pub fn mode(&self) -> DeliveryMode {
        *self.mode_tx.borrow()
    }

    /// Receiver that observes every mode change.
    #[must_use]
    pub fn watch_mode(&self) -> watch::Receiver<DeliveryMode> {
        self.mode_tx.subscribe()
    }

    /// Runs the delivery loop until the task is dropped or aborted.
    pub async fn run(&self) {
        let user = self.sync.user_id().clone();
        let mut subscription = match self.feed.subscribe(&user).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(user_id = %user, err = %e, "change feed unavailable, polling");
                self.poll_until_resubscribed().await
            }
        };

        loop {
            if let Err(e) = self.sync.refresh().await {
                tracing::warn!(err = %e, "catch-up refresh failed");
            }
            self.set_mode(DeliveryMode::Streaming);
            match self.stream(subscription).await {
                StreamEnd::Closed => {
                    tracing::warn!(user_id = %user, "change feed ended, falling back to polling");
                }
                StreamEnd::Idle => tracing::warn!(
                    user_id = %user,
                    idle = ?self.idle_timeout,
                    "change feed silent, falling back to polling"
                ),
            }
            subscription = self.poll_until_resubscribed().await;
        }
    }

    /// Spawns [`run`](Self::run) on the tokio runtime.
    ///
    /// Abort the returned handle to stop delivery.
    pub fn spawn(self) -> (tokio::task::JoinHandle<()>, watch::Receiver<DeliveryMode>)
    where
        S: 'static,
        F: 'static,
    {
        let mode_rx = self.watch_mode();
        let handle = tokio::spawn(async move { self.run().await });
        (handle, mode_rx)
    }

    /// Applies frames until the stream ends or goes quiet. The
    /// subscription is dropped on return.
    async fn stream(&self, mut subscription: FeedSubscription) -> StreamEnd {
        loop {
            let frame = match tokio::time::timeout(self.idle_timeout, subscription.next_frame()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return StreamEnd::Closed,
                Err(_) => return StreamEnd::Idle,
            };
            match event::decode(&frame) {
                Ok(change) => {
                    self.sync.apply_remote(&change);
                }
                Err(e) => {
                    tracing::warn!(err = %e, len = frame.len(), "malformed change frame, skipping");
                }
            }
        }
    }

    async fn poll_until_resubscribed(&self) -> FeedSubscription {
        self.set_mode(DeliveryMode::Polling);
        let user = self.sync.user_id().clone();
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(e) = self.sync.refresh().await {
                tracing::warn!(err = %e, "poll refresh failed");
            }
            match self.feed.subscribe(&user).await {
                Ok(sub) => {
                    tracing::info!(user_id = %user, "change feed resubscribed");
                    return sub;
                }
                Err(e) => tracing::debug!(err = %e, "resubscribe failed, still polling"),
            }
        }
    }

    fn set_mode(&self, mode: DeliveryMode) {
        let previous = self.mode_tx.send_replace(mode);
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "delivery mode changed");
        }
    }
}
