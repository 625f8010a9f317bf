// Keepsake backup scheduler.
// Copyright 2024-2026 Keepsake contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

use time::macros::datetime;

use keepsake::{check_schedule, Error, Schedule};

#[test]
fn state_fires_once_per_slot() {
    let start = datetime!(2025-06-01 05:59:00 +02:00);
    let mut state = check_schedule("0 0 */6 * * ?", start).unwrap();
    assert_eq!(state.next_execution(), datetime!(2025-06-01 06:00:00 +02:00));

    assert!(!state.poll(datetime!(2025-06-01 05:59:59 +02:00)));
    // Exactly on the slot isn't yet past it.
    assert!(!state.poll(datetime!(2025-06-01 06:00:00 +02:00)));
    assert!(state.poll(datetime!(2025-06-01 06:00:01 +02:00)));
    assert!(!state.poll(datetime!(2025-06-01 06:00:02 +02:00)));
    assert_eq!(state.next_execution(), datetime!(2025-06-01 12:00:00 +02:00));
}

#[test]
fn missed_slots_fire_once() {
    let mut state = check_schedule("0 * * * * ?", datetime!(2025-06-01 00:00:30 UTC)).unwrap();
    assert!(state.poll(datetime!(2025-06-01 03:30:30 UTC)));
    assert_eq!(state.next_execution(), datetime!(2025-06-01 03:31:00 UTC));
}

#[test]
fn bad_expressions() {
    for expression in ["", "* * * * *", "61 * * * * ?", "0 0 0 30 2 ?", "0 0 0 * * FUNDAY"] {
        let err = check_schedule(expression, datetime!(2025-06-01 00:00:00 UTC)).unwrap_err();
        assert!(
            matches!(err, Error::InvalidSchedule { .. }),
            "{expression:?} gave {err:?}"
        );
    }
}

#[test]
fn display_is_the_expression() {
    let schedule: Schedule = "0 30 2 * * MON-FRI".parse().unwrap();
    assert_eq!(schedule.to_string(), "0 30 2 * * MON-FRI");
    assert_eq!(schedule.expression(), "0 30 2 * * MON-FRI");
}

#[test]
fn month_relative_days() {
    let start = datetime!(2025-06-01 00:00:00 UTC);
    let last_day = check_schedule("0 0 3 L * ?", start).unwrap();
    assert_eq!(last_day.next_execution(), datetime!(2025-06-30 03:00:00 UTC));
    let first_friday = check_schedule("0 0 3 ? * FRI#1", start).unwrap();
    assert_eq!(first_friday.next_execution(), datetime!(2025-06-06 03:00:00 UTC));
}
