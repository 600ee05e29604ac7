//! Property-based tests for the change-event wire format.
//!
//! Uses proptest to verify:
//! 1. Any valid `ChangeEvent` survives encode → decode.
//! 2. Random bytes never cause a panic in `decode` (returns `Err` gracefully).
//! 3. A truncated frame is rejected rather than misread.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, NaiveDate, Utc};
use proptest::prelude::*;
use streakboard_proto::event::{self, ChangeEvent};
use streakboard_proto::task::{Priority, Task, TaskId, TaskStatus, UserId};
use uuid::Uuid;

// --- Strategies for protocol types ---

/// Strategy for temporary and stored `TaskId` values.
fn arb_task_id() -> impl Strategy<Value = TaskId> {
    (any::<u128>(), any::<bool>()).prop_map(|(n, temporary)| {
        let uuid = Uuid::from_u128(n);
        if temporary {
            TaskId::Temporary(uuid)
        } else {
            TaskId::Stored(uuid)
        }
    })
}

/// Strategy for instants between 2000 and 2100 with sub-second precision.
fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    (946_684_800i64..4_102_444_800, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
        DateTime::from_timestamp(secs, nanos).expect("in range")
    })
}

/// Strategy for due dates.
fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (730_120i32..766_645).prop_map(|days| {
        NaiveDate::from_num_days_from_ce_opt(days).expect("in range")
    })
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Todo),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Done),
    ]
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
    ]
}

/// Strategy for full task rows. Field combinations are not required to be
/// consistent; the codec must carry whatever the store sends.
fn arb_task() -> impl Strategy<Value = Task> {
    (
        arb_task_id(),
        "[a-z0-9-]{1,24}",
        "[^\x00]{1,280}",
        arb_status(),
        arb_priority(),
        prop::option::of(arb_date()),
        prop::option::of(arb_instant()),
        arb_instant(),
    )
        .prop_map(
            |(id, user, title, status, priority, due_date, completed_at, created_at)| Task {
                id,
                user_id: UserId::new(user),
                title,
                status,
                priority,
                due_date,
                completed_at,
                created_at,
            },
        )
}

fn arb_event() -> impl Strategy<Value = ChangeEvent> {
    prop_oneof![
        arb_task().prop_map(ChangeEvent::Insert),
        arb_task().prop_map(ChangeEvent::Update),
        arb_task_id().prop_map(|id| ChangeEvent::Delete { id }),
    ]
}

// --- Property tests ---

proptest! {
    /// Any event survives an encode → decode round-trip.
    #[test]
    fn change_event_round_trip(change in arb_event()) {
        let bytes = event::encode(&change).expect("encode should succeed");
        let decoded = event::decode(&bytes).expect("decode should succeed");
        prop_assert_eq!(change, decoded);
    }

    /// Random bytes never cause a panic when decoded.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = event::decode(&bytes);
    }

    /// Dropping the tail of a frame makes it undecodable.
    #[test]
    fn truncated_frame_is_rejected(change in arb_event(), cut in any::<prop::sample::Index>()) {
        let bytes = event::encode(&change).expect("encode should succeed");
        let len = cut.index(bytes.len());
        prop_assert!(event::decode(&bytes[..len]).is_err());
    }
}
