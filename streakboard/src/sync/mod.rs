//! Optimistic synchronization of one user's task list.
//!
//! [`TaskSynchronizer`] applies every mutation to local state before the
//! store call resolves, then confirms or rolls back. Change-feed events
//! and poll snapshots are merged through the pure functions in
//! [`reconcile`]. [`LiveSync`] drives exactly one delivery mode at a time:
//! streaming from the change feed, or polling the store when the feed is
//! down.

pub mod live;
pub mod reconcile;
pub mod synchronizer;

use std::fmt;
use std::time::Duration;

use streakboard_proto::task::{TaskId, ValidationError};

use crate::store::StoreError;

pub use live::{DeliveryMode, LiveSync};
pub use synchronizer::TaskSynchronizer;

/// Default bound on a single store call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default polling interval while the change feed is unavailable.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default silence after which a change-feed subscription is presumed dead.
pub const DEFAULT_FEED_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations the synchronizer performs against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Initial fetch.
    Load,
    /// Poll-driven full-list refresh.
    Refresh,
    /// Task creation.
    Create,
    /// Field update, including toggle-complete.
    Update,
    /// Task deletion.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Refresh => write!(f, "refresh"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Errors surfaced by synchronizer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The payload was rejected before any local or remote change.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The store rejected or failed the call; local state was rolled back.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The store call did not resolve in time; local state was rolled back.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Which operation timed out.
        operation: Operation,
        /// The configured bound.
        after: Duration,
    },

    /// No task with this id is in the local list.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The task's create has not been confirmed yet.
    #[error("task {0} is still being created")]
    PendingCreate(TaskId),
}

/// Record of the most recent failed operation, for display by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Which operation failed.
    pub operation: Operation,
    /// The task involved, if any.
    pub task_id: Option<TaskId>,
    /// The error that caused the rollback.
    pub error: SyncError,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task_id {
            Some(id) => write!(f, "{} of task {id} failed: {}", self.operation, self.error),
            None => write!(f, "{} failed: {}", self.operation, self.error),
        }
    }
}

/// Timing knobs for the synchronizer and its delivery loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bound on each store call; elapsing counts as failure.
    pub op_timeout: Duration,
    /// Interval between full-list refreshes while polling.
    pub poll_interval: Duration,
    /// Longest a subscription may go without a frame before the delivery
    /// loop drops it and verifies by polling.
    pub feed_idle_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            op_timeout: DEFAULT_OP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            feed_idle_timeout: DEFAULT_FEED_IDLE_TIMEOUT,
        }
    }
}
