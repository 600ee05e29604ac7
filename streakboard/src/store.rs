//! Persistent task store contract and an in-memory implementation.
//!
//! Every write is scoped by task id *and* owning user; the store is the
//! authority for rejecting writes to tasks the user does not own.
//!
//! [`InMemoryStore`] backs the demo binary and the test suites. It can
//! publish change events to a [`LocalFeed`], inject failures per
//! operation, and add artificial latency to every call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use streakboard_proto::event::ChangeEvent;
use streakboard_proto::task::{NewTask, Task, TaskId, TaskPatch, UserId};

use crate::feed::LocalFeed;

/// Errors returned by a [`TaskStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The task exists but belongs to another user.
    #[error("task {0} is not owned by the requesting user")]
    Forbidden(TaskId),

    /// No task with the given id exists.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The store refused the write (constraint violation and similar).
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Store operation kinds, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `list`
    List,
    /// `insert`
    Insert,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// Async CRUD access to the persistent task store.
pub trait TaskStore: Send + Sync {
    /// Fetch every task owned by `user`, newest first.
    fn list(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// Insert a task for `user` and return the stored row with its
    /// permanent id.
    fn insert(
        &self,
        user: &UserId,
        new_task: &NewTask,
    ) -> impl std::future::Future<Output = Result<Task, StoreError>> + Send;

    /// Apply `patch` to the task `id` owned by `user`.
    fn update(
        &self,
        id: &TaskId,
        user: &UserId,
        patch: &TaskPatch,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Delete the task `id` owned by `user`.
    fn delete(
        &self,
        id: &TaskId,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

struct StoreInner {
    rows: Mutex<Vec<Task>>,
    failures: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
    latency: Mutex<Duration>,
    feed: Option<LocalFeed>,
}

/// In-memory [`TaskStore`]. Cloning yields another handle to the same rows.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<StoreInner>,
}

impl InMemoryStore {
    /// Creates an empty store that publishes no change events.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty store that publishes every write to `feed`.
    #[must_use]
    pub fn with_feed(feed: LocalFeed) -> Self {
        Self::build(Some(feed))
    }

    fn build(feed: Option<LocalFeed>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                rows: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
                latency: Mutex::new(Duration::ZERO),
                feed,
            }),
        }
    }

    /// Delays every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// Makes the next call of kind `op` fail with `error`. Queued
    /// failures are consumed in order.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.inner
            .failures
            .lock()
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Returns a copy of every row, regardless of owner.
    #[must_use]
    pub fn rows(&self) -> Vec<Task> {
        self.inner.rows.lock().clone()
    }

    /// Writes a row directly without publishing an event, as if it had
    /// been written before any subscription existed.
    pub fn seed(&self, task: Task) {
        self.inner.rows.lock().insert(0, task);
    }

    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .inner
            .failures
            .lock()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(err) => {
                tracing::debug!(?op, err = %err, "injected store failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn publish(&self, user: &UserId, event: &ChangeEvent) {
        if let Some(feed) = &self.inner.feed {
            feed.publish(user, event);
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds the row `id` and checks that `user` owns it.
fn owned_position(rows: &[Task], id: &TaskId, user: &UserId) -> Result<usize, StoreError> {
    let pos = rows
        .iter()
        .position(|t| t.id == *id)
        .ok_or(StoreError::NotFound(*id))?;
    if rows[pos].user_id != *user {
        return Err(StoreError::Forbidden(*id));
    }
    Ok(pos)
}

impl TaskStore for InMemoryStore {
    async fn list(&self, user: &UserId) -> Result<Vec<Task>, StoreError> {
        self.enter(StoreOp::List).await?;
        Ok(self
            .inner
            .rows
            .lock()
            .iter()
            .filter(|t| t.user_id == *user)
            .cloned()
            .collect())
    }

    async fn insert(&self, user: &UserId, new_task: &NewTask) -> Result<Task, StoreError> {
        self.enter(StoreOp::Insert).await?;
        new_task
            .validate()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        let task = new_task
            .clone()
            .into_task(TaskId::stored(), user.clone(), Utc::now());
        self.inner.rows.lock().insert(0, task.clone());
        tracing::debug!(task_id = %task.id, user_id = %user, "task inserted");
        self.publish(user, &ChangeEvent::Insert(task.clone()));
        Ok(task)
    }

    async fn update(&self, id: &TaskId, user: &UserId, patch: &TaskPatch) -> Result<(), StoreError> {
        self.enter(StoreOp::Update).await?;
        patch
            .validate()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        let updated = {
            let mut rows = self.inner.rows.lock();
            let pos = owned_position(&rows, id, user)?;
            let mut patch = patch.clone();
            patch.normalize_completion(&rows[pos], Utc::now());
            rows[pos].apply(&patch);
            rows[pos].clone()
        };
        tracing::debug!(task_id = %id, user_id = %user, "task updated");
        self.publish(user, &ChangeEvent::Update(updated));
        Ok(())
    }

    async fn delete(&self, id: &TaskId, user: &UserId) -> Result<(), StoreError> {
        self.enter(StoreOp::Delete).await?;
        {
            let mut rows = self.inner.rows.lock();
            let pos = owned_position(&rows, id, user)?;
            rows.remove(pos);
        }
        tracing::debug!(task_id = %id, user_id = %user, "task deleted");
        self.publish(user, &ChangeEvent::Delete { id: *id });
        Ok(())
    }
}
