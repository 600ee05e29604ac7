//! Optimistic task list owner for one user session.
//!
//! Each mutating call goes through three steps:
//!
//! 1. validate, then apply the change to local state (visible to the next
//!    read immediately),
//! 2. await the store call, bounded by [`SyncConfig::op_timeout`],
//! 3. on success keep (or, for creates, reconcile) the local change; on
//!    failure undo it and record a [`SyncFailure`].
//!
//! A stored task with unsettled calls keeps the last value the store is
//! known to hold plus the calls in issue order. Its local value is always
//! that base with the remaining calls applied, so a failed call is undone
//! exactly even when later calls to the same task are still in flight or
//! already confirmed.
//!
//! Local state sits behind a `parking_lot` mutex that is never held
//! across an `.await`.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use streakboard_proto::event::ChangeEvent;
use streakboard_proto::task::{NewTask, Task, TaskId, TaskPatch, UserId};

use super::reconcile::{
    apply_event, confirm_create, place_task, position, reconcile_snapshot, remove_task,
};
use super::{Operation, SyncConfig, SyncError, SyncFailure};
use crate::store::{StoreError, TaskStore};
use crate::streak::streak_for_tasks;

/// An unsettled store call against a stored task.
#[derive(Debug, Clone)]
enum PendingOp {
    Update(TaskPatch),
    Delete,
}

/// Unsettled calls against one stored task.
#[derive(Debug)]
struct PendingTask {
    /// Last value the store is known to hold; `None` once the row is gone.
    base: Option<Task>,
    /// Index the task goes back to if it has to reappear.
    position: usize,
    /// Calls in issue order, keyed by ticket.
    ops: Vec<(u64, PendingOp)>,
}

impl PendingTask {
    /// `base` with every unsettled call applied in order.
    fn view(&self) -> Option<Task> {
        let mut task = self.base.clone()?;
        for (_, op) in &self.ops {
            match op {
                PendingOp::Update(patch) => task.apply(patch),
                PendingOp::Delete => return None,
            }
        }
        Some(task)
    }
}

#[derive(Default)]
struct SyncState {
    /// Local task list, newest first.
    tasks: Vec<Task>,
    /// Stored task id -> unsettled calls touching it.
    in_flight: HashMap<TaskId, PendingTask>,
    /// Temporary ids whose create has not settled.
    creating: HashSet<TaskId>,
    next_ticket: u64,
    /// Running list fetches.
    fetching: usize,
    /// Bumped for every settled or remote change while a fetch runs.
    generation: u64,
    /// Task id -> generation of its latest change while a fetch runs.
    touched: HashMap<TaskId, u64>,
    /// Most recent failure, until acknowledged or superseded by a success.
    failure: Option<SyncFailure>,
}

impl SyncState {
    /// Registers `op` against the task at `pos` and applies it locally.
    fn begin(&mut self, id: TaskId, pos: usize, op: PendingOp) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let current = &self.tasks[pos];
        let entry = self.in_flight.entry(id).or_insert_with(|| PendingTask {
            base: Some(current.clone()),
            position: pos,
            ops: Vec::new(),
        });
        entry.position = pos;
        entry.ops.push((ticket, op));
        let view = entry.view();
        place_task(&mut self.tasks, &id, view, pos);
        ticket
    }

    /// Settles call `ticket` and rewrites the task from what is left.
    ///
    /// An applied call is folded into the base; a failed one is dropped.
    fn settle(&mut self, id: &TaskId, ticket: u64, applied: bool) {
        let Some(entry) = self.in_flight.get_mut(id) else {
            return;
        };
        if let Some(idx) = entry.ops.iter().position(|(t, _)| *t == ticket) {
            let (_, op) = entry.ops.remove(idx);
            if applied {
                match op {
                    PendingOp::Update(patch) => {
                        if let Some(base) = &mut entry.base {
                            base.apply(&patch);
                        }
                    }
                    PendingOp::Delete => entry.base = None,
                }
            }
        }
        let view = entry.view();
        let fallback = entry.position;
        if entry.ops.is_empty() {
            self.in_flight.remove(id);
        }
        place_task(&mut self.tasks, id, view, fallback);
        self.touch(*id);
    }

    /// Merges a change-feed event. For a task with unsettled calls the
    /// event replaces the base and the calls are replayed on top.
    fn apply_remote(&mut self, event: &ChangeEvent) -> bool {
        let id = *event.task_id();
        let changed = match self.in_flight.get_mut(&id) {
            Some(entry) => {
                entry.base = match event {
                    ChangeEvent::Insert(task) | ChangeEvent::Update(task) => Some(task.clone()),
                    ChangeEvent::Delete { .. } => None,
                };
                let view = entry.view();
                let fallback = entry.position;
                place_task(&mut self.tasks, &id, view, fallback)
            }
            None => apply_event(&mut self.tasks, event),
        };
        if changed {
            self.touch(id);
        }
        changed
    }

    /// Marks `id` as changed after any running fetch started.
    fn touch(&mut self, id: TaskId) {
        if self.fetching > 0 {
            self.generation += 1;
            self.touched.insert(id, self.generation);
        }
    }

    fn is_pending(&self, id: &TaskId) -> bool {
        self.in_flight.contains_key(id) || self.creating.contains(id)
    }

    fn record(&mut self, operation: Operation, task_id: Option<TaskId>, error: &SyncError) {
        tracing::warn!(%operation, task_id = ?task_id, err = %error, "operation failed, local state rolled back");
        self.failure = Some(SyncFailure {
            operation,
            task_id,
            error: error.clone(),
        });
    }
}

/// Ends a fetch registration, also when the fetch future is dropped.
struct FetchGuard<'a> {
    state: &'a Mutex<SyncState>,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.fetching -= 1;
        if state.fetching == 0 {
            state.touched.clear();
        }
    }
}

/// Owns the local view of one user's tasks.
///
/// The store is a constructor parameter; the synchronizer holds no global
/// state, so tests drive it with an in-memory store.
pub struct TaskSynchronizer<S: TaskStore> {
    store: S,
    user_id: UserId,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl<S: TaskStore> TaskSynchronizer<S> {
    /// Creates a synchronizer with an empty local list.
    pub fn new(store: S, user_id: UserId, config: SyncConfig) -> Self {
        Self {
            store,
            user_id,
            config,
            state: Mutex::new(SyncState::default()),
        }
    }

    /// The user whose tasks this synchronizer owns.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The timing configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Snapshot of the local task list, newest first.
    #[must_use]
    pub fn current_tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    /// Local copy of a single task.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        let state = self.state.lock();
        position(&state.tasks, id).map(|pos| state.tasks[pos].clone())
    }

    /// Streak derived from the current local list.
    #[must_use]
    pub fn current_streak(&self, now: DateTime<Utc>) -> u32 {
        streak_for_tasks(&self.state.lock().tasks, now)
    }

    /// The most recent failed operation, if not yet cleared.
    #[must_use]
    pub fn last_failure(&self) -> Option<SyncFailure> {
        self.state.lock().failure.clone()
    }

    /// Clears the failure signal.
    pub fn acknowledge_failure(&self) {
        self.state.lock().failure = None;
    }

    /// Number of store calls that have not settled yet.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        let state = self.state.lock();
        state.in_flight.values().map(|p| p.ops.len()).sum::<usize>() + state.creating.len()
    }

    /// Replaces local state with the store's list.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] or [`SyncError::Timeout`]; local state
    /// is left untouched and the failure is recorded.
    pub async fn load(&self) -> Result<(), SyncError> {
        let result = self.fetch(Operation::Load).await;
        if let Err(e) = &result {
            self.state.lock().record(Operation::Load, None, e);
        }
        result
    }

    /// Reconciles local state against a fresh store listing.
    ///
    /// Used by the polling fallback. Tasks with unsettled operations keep
    /// their optimistic local value, and a task whose write settled (or
    /// whose change event arrived) while the listing was in flight keeps
    /// its newer local value. Failures are returned but not recorded as
    /// user-facing failures.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] or [`SyncError::Timeout`].
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.fetch(Operation::Refresh).await
    }

    async fn fetch(&self, operation: Operation) -> Result<(), SyncError> {
        let since = {
            let mut state = self.state.lock();
            state.fetching += 1;
            state.generation
        };
        let _guard = FetchGuard { state: &self.state };
        let snapshot = self.bounded(operation, self.store.list(&self.user_id)).await?;

        let mut state = self.state.lock();
        let SyncState {
            tasks,
            in_flight,
            touched,
            ..
        } = &mut *state;
        reconcile_snapshot(tasks, snapshot, |id| {
            in_flight.contains_key(id) || touched.get(id).is_some_and(|g| *g > since)
        });
        tracing::debug!(%operation, tasks = tasks.len(), "task list reconciled");
        Ok(())
    }

    /// Merges one change-feed event. Returns `true` if the list changed.
    pub fn apply_remote(&self, event: &ChangeEvent) -> bool {
        let changed = self.state.lock().apply_remote(event);
        tracing::trace!(kind = event.kind(), task_id = %event.task_id(), changed, "remote event applied");
        changed
    }

    /// Creates a task optimistically under a temporary id.
    ///
    /// Returns the store-confirmed task.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] before any change, or
    /// [`SyncError::Store`] / [`SyncError::Timeout`] after removing the
    /// optimistic entry.
    pub async fn create(&self, new_task: NewTask) -> Result<Task, SyncError> {
        new_task.validate()?;
        let temp_id = TaskId::temporary();
        {
            let optimistic = new_task
                .clone()
                .into_task(temp_id, self.user_id.clone(), Utc::now());
            let mut state = self.state.lock();
            state.tasks.insert(0, optimistic);
            state.creating.insert(temp_id);
        }
        tracing::debug!(task_id = %temp_id, "create applied locally");

        let result = self
            .bounded(Operation::Create, self.store.insert(&self.user_id, &new_task))
            .await;

        let mut state = self.state.lock();
        state.creating.remove(&temp_id);
        match result {
            Ok(stored) => {
                confirm_create(&mut state.tasks, &temp_id, stored.clone());
                state.touch(stored.id);
                state.failure = None;
                tracing::debug!(temp_id = %temp_id, task_id = %stored.id, "create confirmed");
                Ok(stored)
            }
            Err(e) => {
                remove_task(&mut state.tasks, &temp_id);
                state.record(Operation::Create, Some(temp_id), &e);
                Err(e)
            }
        }
    }

    /// Updates a task optimistically, stamping status changes with the
    /// current instant.
    ///
    /// # Errors
    ///
    /// See [`update_at`](Self::update_at).
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<(), SyncError> {
        self.update_at(id, patch, Utc::now()).await
    }

    /// Updates a task optimistically; a status change that does not set
    /// `completed_at` itself gets it derived from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`], [`SyncError::NotFound`] or
    /// [`SyncError::PendingCreate`] before any change, or
    /// [`SyncError::Store`] / [`SyncError::Timeout`] after restoring the
    /// task's previous value.
    pub async fn update_at(
        &self,
        id: &TaskId,
        mut patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        patch.validate()?;
        if id.is_temporary() {
            return Err(SyncError::PendingCreate(*id));
        }
        let ticket = {
            let mut state = self.state.lock();
            let pos = position(&state.tasks, id).ok_or(SyncError::NotFound(*id))?;
            patch.normalize_completion(&state.tasks[pos], now);
            if patch.is_empty() {
                return Ok(());
            }
            state.begin(*id, pos, PendingOp::Update(patch.clone()))
        };
        tracing::debug!(task_id = %id, "update applied locally");

        let result = self
            .bounded(Operation::Update, self.store.update(id, &self.user_id, &patch))
            .await;

        let mut state = self.state.lock();
        state.settle(id, ticket, result.is_ok());
        match result {
            Ok(()) => {
                state.failure = None;
                Ok(())
            }
            Err(e) => {
                state.record(Operation::Update, Some(*id), &e);
                Err(e)
            }
        }
    }

    /// Flips a task into or out of `done` using the current instant.
    ///
    /// # Errors
    ///
    /// See [`update_at`](Self::update_at).
    pub async fn toggle_complete(&self, id: &TaskId) -> Result<(), SyncError> {
        self.toggle_complete_at(id, Utc::now()).await
    }

    /// Flips a task into or out of `done`. Entering `done` records `now`
    /// as the completion instant; leaving it clears the instant. No other
    /// field changes.
    ///
    /// # Errors
    ///
    /// See [`update_at`](Self::update_at).
    pub async fn toggle_complete_at(&self, id: &TaskId, now: DateTime<Utc>) -> Result<(), SyncError> {
        if id.is_temporary() {
            return Err(SyncError::PendingCreate(*id));
        }
        let patch = {
            let state = self.state.lock();
            let pos = position(&state.tasks, id).ok_or(SyncError::NotFound(*id))?;
            TaskPatch::toggle(&state.tasks[pos], now)
        };
        self.update_at(id, patch, now).await
    }

    /// Deletes a task optimistically.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] or [`SyncError::PendingCreate`]
    /// before any change, or [`SyncError::Store`] / [`SyncError::Timeout`]
    /// after reinserting the task at its previous position.
    pub async fn delete(&self, id: &TaskId) -> Result<(), SyncError> {
        if id.is_temporary() {
            return Err(SyncError::PendingCreate(*id));
        }
        let ticket = {
            let mut state = self.state.lock();
            let pos = position(&state.tasks, id).ok_or(SyncError::NotFound(*id))?;
            state.begin(*id, pos, PendingOp::Delete)
        };
        tracing::debug!(task_id = %id, "delete applied locally");

        let result = self
            .bounded(Operation::Delete, self.store.delete(id, &self.user_id))
            .await;

        let mut state = self.state.lock();
        state.settle(id, ticket, result.is_ok());
        match result {
            Ok(()) => {
                state.failure = None;
                Ok(())
            }
            Err(e) => {
                state.record(Operation::Delete, Some(*id), &e);
                Err(e)
            }
        }
    }

    /// Returns `true` while a store call for `id` is unsettled.
    #[must_use]
    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.state.lock().is_pending(id)
    }

    async fn bounded<T, F>(&self, operation: Operation, call: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.config.op_timeout, call).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout {
                operation,
                after: self.config.op_timeout,
            }),
        }
    }
}
