//! `Streakboard`: optimistic task list with daily completion streaks.

pub mod config;
pub mod feed;
pub mod store;
pub mod streak;
pub mod sync;
