//! Change-feed events and their postcard encoding.
//!
//! The change feed delivers one [`ChangeEvent`] per frame. Delivery is
//! at-least-once, so consumers must treat every event idempotently.

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId};

/// Error type for change-event encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A row-level change notification from the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    /// A task was inserted.
    Insert(Task),
    /// A task was updated; carries the full new row.
    Update(Task),
    /// A task was deleted.
    Delete {
        /// Id of the deleted task.
        id: TaskId,
    },
}

impl ChangeEvent {
    /// Returns the id of the task this event concerns.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Insert(task) | Self::Update(task) => &task.id,
            Self::Delete { id } => id,
        }
    }

    /// Short event kind name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Encodes a [`ChangeEvent`] into bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode(event: &ChangeEvent) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ChangeEvent`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode(bytes: &[u8]) -> Result<ChangeEvent, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
