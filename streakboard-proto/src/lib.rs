//! Shared data model and change-feed wire format for streakboard.

pub mod event;
pub mod task;
