//! Task model for a single user's task list.
//!
//! A [`Task`] carries the streak-relevant pair `status` / `completed_at`:
//! `completed_at` is set exactly when `status` is [`TaskStatus::Done`].
//! Partial updates travel as [`TaskPatch`] values, which keep that pair
//! consistent via [`TaskPatch::normalize_completion`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 280;

/// Errors raised when a task payload fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Task title is empty or whitespace only.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds [`MAX_TASK_TITLE_LENGTH`] characters.
    #[error("task title too long ({len} characters, max {max})")]
    TitleTooLong {
        /// Length of the rejected title in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Checks a task title against the length and emptiness rules.
///
/// # Errors
///
/// Returns [`ValidationError::TitleEmpty`] for empty or whitespace-only
/// titles and [`ValidationError::TitleTooLong`] past
/// [`MAX_TASK_TITLE_LENGTH`] characters.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::TitleEmpty);
    }
    let len = title.chars().count();
    if len > MAX_TASK_TITLE_LENGTH {
        return Err(ValidationError::TitleTooLong {
            len,
            max: MAX_TASK_TITLE_LENGTH,
        });
    }
    Ok(())
}

/// Identifier of a task in the local list.
///
/// Tasks created locally carry a [`TaskId::Temporary`] id until the store
/// confirms the insert and hands back a [`TaskId::Stored`] id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskId {
    /// Placeholder id for a create the store has not confirmed yet.
    Temporary(Uuid),
    /// Permanent id assigned by the store.
    Stored(Uuid),
}

impl TaskId {
    /// Creates a fresh temporary id for an optimistic create.
    #[must_use]
    pub fn temporary() -> Self {
        Self::Temporary(Uuid::new_v4())
    }

    /// Creates a fresh time-ordered store id (UUID v7).
    #[must_use]
    pub fn stored() -> Self {
        Self::Stored(Uuid::now_v7())
    }

    /// Wraps an existing store-assigned UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self::Stored(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        match self {
            Self::Temporary(uuid) | Self::Stored(uuid) => uuid,
        }
    }

    /// Returns `true` for ids that still await store confirmation.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Temporary(uuid) => write!(f, "tmp-{uuid}"),
            Self::Stored(uuid) => write!(f, "{uuid}"),
        }
    }
}

/// Identifier of the user owning a task list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a user id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string form of this user id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// Actively being worked on.
    InProgress,
    /// Finished; counts toward the streak on the day of `completed_at`.
    Done,
}

impl TaskStatus {
    /// Returns `true` for [`TaskStatus::Done`].
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "todo"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low priority.
    Low,
    /// Medium priority.
    #[default]
    Medium,
    /// High priority.
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A unit of work owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Temporary or store-assigned identifier.
    pub id: TaskId,
    /// Owning user; every store write is scoped by it.
    pub user_id: UserId,
    /// Non-empty title, at most [`MAX_TASK_TITLE_LENGTH`] characters.
    pub title: String,
    /// Workflow status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Optional calendar due date.
    pub due_date: Option<NaiveDate>,
    /// Set exactly when `status` is [`TaskStatus::Done`].
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation instant, never changed after insert.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Returns the completion instant if this task counts toward a streak.
    #[must_use]
    pub fn completion(&self) -> Option<DateTime<Utc>> {
        if self.status.is_done() {
            self.completed_at
        } else {
            None
        }
    }

    /// Applies every field present in `patch`.
    ///
    /// The patch is applied as-is; callers normalize it first with
    /// [`TaskPatch::normalize_completion`] to keep `completed_at` paired
    /// with `status`.
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
    }
}

/// Payload for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Initial status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Optional due date.
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    /// Creates a `todo` task payload with medium priority and no due date.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            due_date: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the due date.
    #[must_use]
    pub const fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Validates the payload.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the title is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)
    }

    /// Builds the full task record, stamping `completed_at` when the
    /// initial status is already `done`.
    #[must_use]
    pub fn into_task(self, id: TaskId, user_id: UserId, now: DateTime<Utc>) -> Task {
        Task {
            id,
            user_id,
            title: self.title,
            status: self.status,
            priority: self.priority,
            due_date: self.due_date,
            completed_at: self.status.is_done().then_some(now),
            created_at: now,
        }
    }
}

/// Partial update of a task. `None` leaves a field untouched; nullable
/// fields use `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New status.
    pub status: Option<TaskStatus>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New due date, or `Some(None)` to clear it.
    pub due_date: Option<Option<NaiveDate>>,
    /// New completion instant, or `Some(None)` to clear it.
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    /// Patch that only changes the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Patch that moves a task to `status`, writing the matching
    /// `completed_at` in the same update.
    #[must_use]
    pub fn status(status: TaskStatus, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(status.is_done().then_some(now)),
            ..Self::default()
        }
    }

    /// Patch that flips `task` into or out of `done`.
    ///
    /// A task leaving `done` goes back to `todo`.
    #[must_use]
    pub fn toggle(task: &Task, now: DateTime<Utc>) -> Self {
        let next = if task.status.is_done() {
            TaskStatus::Todo
        } else {
            TaskStatus::Done
        };
        Self::status(next, now)
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.completed_at.is_none()
    }

    /// Validates the fields present in the patch.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if a new title is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.title {
            Some(title) => validate_title(title),
            None => Ok(()),
        }
    }

    /// Derives `completed_at` from the status the task ends up with.
    ///
    /// Entering `done` stamps `now` unless the patch carries its own
    /// instant; a task staying `done` keeps its instant. Any other status
    /// clears it, whatever the patch asked for. Afterwards `completed_at`
    /// is set exactly when the resulting status is `done`.
    pub fn normalize_completion(&mut self, current: &Task, now: DateTime<Utc>) {
        let status = self.status.unwrap_or(current.status);
        self.completed_at = if status.is_done() {
            match (self.completed_at, current.completion()) {
                (Some(Some(instant)), _) => Some(Some(instant)),
                (_, Some(_)) => None,
                (_, None) => Some(Some(now)),
            }
        } else if current.completed_at.is_some() {
            Some(None)
        } else {
            None
        };
    }
}
