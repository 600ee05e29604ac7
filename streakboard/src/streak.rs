//! Daily completion streak computation.
//!
//! All day arithmetic happens on UTC calendar days regardless of the
//! user's locale, so two users with the same completions always see the
//! same streak. Switching to local days would change existing streaks.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};

use streakboard_proto::task::Task;

/// Errors raised at the streak engine boundary.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreakError {
    /// An instant could not be parsed as RFC 3339.
    #[error("invalid instant {input:?}: {reason}")]
    InvalidInstant {
        /// The rejected input.
        input: String,
        /// Parser message.
        reason: String,
    },
}

/// A UTC calendar day, rendered as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    /// Returns the calendar date.
    #[must_use]
    pub const fn date(self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for DayKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Parses an RFC 3339 instant.
///
/// # Errors
///
/// Returns [`StreakError::InvalidInstant`] for anything that is not a
/// complete RFC 3339 timestamp. Malformed input is never coerced.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>, StreakError> {
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StreakError::InvalidInstant {
            input: input.to_string(),
            reason: e.to_string(),
        })
}

/// Returns the UTC calendar day of `instant`.
#[must_use]
pub fn date_key(instant: DateTime<Utc>) -> DayKey {
    DayKey(instant.date_naive())
}

/// Returns the day `n` calendar days before `key`.
///
/// Saturates at the earliest representable date.
#[must_use]
pub fn prior_date_key(key: DayKey, n: u64) -> DayKey {
    DayKey(key.0.checked_sub_days(Days::new(n)).unwrap_or(NaiveDate::MIN))
}

/// Counts consecutive UTC days with at least one completion, ending today
/// or yesterday relative to `now`.
///
/// Completions on days after `now`'s day are ignored. Several completions
/// on one day count once. If neither today nor yesterday has a completion
/// the streak is 0.
pub fn compute_streak<I>(completions: I, now: DateTime<Utc>) -> u32
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let today = date_key(now);
    let days: HashSet<DayKey> = completions
        .into_iter()
        .map(date_key)
        .filter(|day| *day <= today)
        .collect();

    let yesterday = prior_date_key(today, 1);
    let mut cursor = if days.contains(&today) {
        today
    } else if days.contains(&yesterday) {
        yesterday
    } else {
        return 0;
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        let previous = prior_date_key(cursor, 1);
        if previous == cursor {
            break;
        }
        cursor = previous;
    }
    streak
}

/// Streak over every `done` task's completion instant.
pub fn streak_for_tasks<'a, I>(tasks: I, now: DateTime<Utc>) -> u32
where
    I: IntoIterator<Item = &'a Task>,
{
    compute_streak(tasks.into_iter().filter_map(Task::completion), now)
}
