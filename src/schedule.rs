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

//! Cron-style schedules, with seconds.
//!
//! An expression has six whitespace-separated fields:
//!
//! ```text
//! seconds minutes hours day-of-month month day-of-week
//! ```
//!
//! Each field is `*`, a value, a range `a-b`, a step `*/n`, `a/n` or `a-b/n`,
//! or a comma-separated list of those. The day fields also accept `?`, meaning
//! no restriction. Months may be named `JAN`..`DEC` and days of the week
//! `SUN`..`SAT`; day of week 7 is Sunday, the same as 0.
//!
//! The day fields also take these calendar-relative items, alone or in a list:
//!
//! * day of month `L`: the last day of the month, and `L-n` for n days before it;
//! * day of month `nW`: the weekday (Monday to Friday) nearest day n, without
//!   leaving the month, and `LW` for the last weekday of the month;
//! * day of week `dL`: the last day d of the month, such as `5L` or `FRIL`;
//! * day of week `d#n`: the nth day d of the month, such as `MON#1`.
//!
//! When both day fields are restricted, a day matches if either does.
//!
//! The scheduler doesn't sleep or spawn anything: the caller polls it with the
//! current time, and it says whether a run is due.

use std::fmt;
use std::str::FromStr;

use time::util::days_in_year_month;
use time::{Date, Duration, Month, OffsetDateTime, Time, Weekday};
use tracing::info;

use crate::{Error, Result};

/// How far ahead to search for a matching time before declaring that the
/// expression never fires. Long enough to include a leap day.
const SEARCH_YEARS: i64 = 8;

/// Set of permitted values of one field, as a bitmask.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u8) -> bool {
        self.0 & (1 << value) != 0
    }
}

#[derive(Clone, Copy, Debug)]
struct FieldSpec {
    name: &'static str,
    min: u8,
    max: u8,
    names: &'static [&'static str],
    /// Accepts `?`.
    day_field: bool,
}

const SECONDS: FieldSpec = FieldSpec {
    name: "seconds",
    min: 0,
    max: 59,
    names: &[],
    day_field: false,
};
const MINUTES: FieldSpec = FieldSpec {
    name: "minutes",
    min: 0,
    max: 59,
    names: &[],
    day_field: false,
};
const HOURS: FieldSpec = FieldSpec {
    name: "hours",
    min: 0,
    max: 23,
    names: &[],
    day_field: false,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    day_field: true,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
    day_field: false,
};
/// Day of week parses 0..=7, and 7 is folded onto 0 afterwards.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    day_field: true,
};

/// A day item that depends on the shape of the month.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DayRule {
    /// `L` or `L-n`: `offset` days before the last day of the month.
    LastDayOfMonth { offset: u8 },
    /// `LW`: the last Monday to Friday of the month.
    LastWeekdayOfMonth,
    /// `nW`: the Monday to Friday nearest this day of the month.
    NearestWeekday(u8),
    /// `dL`: the last day of the month that falls on this weekday.
    LastOfWeekday(u8),
    /// `d#n`: the nth day of the month that falls on this weekday.
    NthOfWeekday { weekday: u8, nth: u8 },
}

impl DayRule {
    fn matches(self, date: Date) -> bool {
        let day = date.day();
        let last = days_in_year_month(date.year(), date.month());
        let weekday = date.weekday().number_days_from_sunday();
        match self {
            DayRule::LastDayOfMonth { offset } => last.checked_sub(offset) == Some(day),
            DayRule::LastWeekdayOfMonth => nearest_weekday(date, last) == Some(day),
            DayRule::NearestWeekday(target) => nearest_weekday(date, target) == Some(day),
            DayRule::LastOfWeekday(d) => weekday == d && day + 7 > last,
            DayRule::NthOfWeekday { weekday: d, nth } => weekday == d && (day - 1) / 7 + 1 == nth,
        }
    }
}

/// The day of `date`'s month that is the Monday to Friday nearest to day
/// `target`, staying within the month. None if the month has no such day.
fn nearest_weekday(date: Date, target: u8) -> Option<u8> {
    let last = days_in_year_month(date.year(), date.month());
    let target_date = date.replace_day(target).ok()?;
    Some(match target_date.weekday() {
        Weekday::Saturday if target == 1 => 3,
        Weekday::Saturday => target - 1,
        Weekday::Sunday if target == last => target - 2,
        Weekday::Sunday => target + 1,
        _ => target,
    })
}

/// A parsed six-field cron expression.
#[derive(Clone, Eq, PartialEq)]
pub struct Schedule {
    expression: String,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    day_of_month_rules: Vec<DayRule>,
    day_of_week_rules: Vec<DayRule>,
    /// True if the day-of-month field was `*` or `?`.
    any_day_of_month: bool,
    any_day_of_week: bool,
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(expression: &str) -> Result<Schedule> {
        let invalid = |reason: String| Error::InvalidSchedule {
            expression: expression.to_owned(),
            reason,
        };
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(invalid(format!(
                "expected 6 fields (seconds minutes hours day-of-month month day-of-week), found {}",
                fields.len()
            )));
        }
        let field = |text: &str, spec: &FieldSpec| parse_field(text, spec).map_err(invalid);
        let (days_of_month, day_of_month_rules) =
            parse_day_field(fields[3], &DAY_OF_MONTH, day_of_month_rule).map_err(invalid)?;
        let (mut days_of_week, day_of_week_rules) =
            parse_day_field(fields[5], &DAY_OF_WEEK, day_of_week_rule).map_err(invalid)?;
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 & !(1 << 7)) | 1);
        }
        Ok(Schedule {
            expression: expression.to_owned(),
            seconds: field(fields[0], &SECONDS)?,
            minutes: field(fields[1], &MINUTES)?,
            hours: field(fields[2], &HOURS)?,
            days_of_month,
            months: field(fields[4], &MONTH)?,
            days_of_week,
            day_of_month_rules,
            day_of_week_rules,
            any_day_of_month: is_wildcard(fields[3]),
            any_day_of_week: is_wildcard(fields[5]),
        })
    }
}

fn is_wildcard(field: &str) -> bool {
    field == "*" || field == "?"
}

fn parse_field(text: &str, spec: &FieldSpec) -> std::result::Result<FieldSet, String> {
    let mut bits = 0u64;
    for item in text.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u8 = step
                    .parse()
                    .map_err(|_| format!("invalid step {step:?} in {} field", spec.name))?;
                if step == 0 {
                    return Err(format!("step of zero in {} field", spec.name));
                }
                (range, Some(step))
            }
            None => (item, None),
        };
        let (first, last) = if range == "*" || (range == "?" && spec.day_field) {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            let (a, b) = (parse_value(a, spec)?, parse_value(b, spec)?);
            if a > b {
                return Err(format!("backwards range {range:?} in {} field", spec.name));
            }
            (a, b)
        } else {
            let a = parse_value(range, spec)?;
            // "5/15" means from 5 to the end, every 15.
            (a, if step.is_some() { spec.max } else { a })
        };
        let step = step.unwrap_or(1) as usize;
        for value in (first..=last).step_by(step) {
            bits |= 1 << value;
        }
    }
    Ok(FieldSet(bits))
}

type RuleParser = fn(&str) -> std::result::Result<Option<DayRule>, String>;

/// Parse a day field, splitting out the items that are [DayRule]s.
fn parse_day_field(
    text: &str,
    spec: &FieldSpec,
    rule: RuleParser,
) -> std::result::Result<(FieldSet, Vec<DayRule>), String> {
    let mut bits = 0u64;
    let mut rules = Vec::new();
    for item in text.split(',') {
        match rule(item)? {
            Some(day_rule) => rules.push(day_rule),
            None => bits |= parse_field(item, spec)?.0,
        }
    }
    Ok((FieldSet(bits), rules))
}

fn day_of_month_rule(item: &str) -> std::result::Result<Option<DayRule>, String> {
    let upper = item.to_ascii_uppercase();
    if upper == "L" {
        Ok(Some(DayRule::LastDayOfMonth { offset: 0 }))
    } else if upper == "LW" {
        Ok(Some(DayRule::LastWeekdayOfMonth))
    } else if let Some(offset) = upper.strip_prefix("L-") {
        match offset.parse::<u8>() {
            Ok(offset) if offset <= 30 => Ok(Some(DayRule::LastDayOfMonth { offset })),
            _ => Err(format!("invalid offset {offset:?} in day-of-month field")),
        }
    } else if let Some(day) = upper.strip_suffix('W') {
        Ok(Some(DayRule::NearestWeekday(parse_value(day, &DAY_OF_MONTH)?)))
    } else {
        Ok(None)
    }
}

fn day_of_week_rule(item: &str) -> std::result::Result<Option<DayRule>, String> {
    let upper = item.to_ascii_uppercase();
    if let Some((day, nth)) = upper.split_once('#') {
        let weekday = parse_value(day, &DAY_OF_WEEK)? % 7;
        match nth.parse::<u8>() {
            Ok(nth) if (1..=5).contains(&nth) => {
                Ok(Some(DayRule::NthOfWeekday { weekday, nth }))
            }
            _ => Err(format!("invalid occurrence {nth:?} in day-of-week field")),
        }
    } else if let Some(day) = upper.strip_suffix('L') {
        let weekday = parse_value(day, &DAY_OF_WEEK)? % 7;
        Ok(Some(DayRule::LastOfWeekday(weekday)))
    } else {
        Ok(None)
    }
}

fn parse_value(text: &str, spec: &FieldSpec) -> std::result::Result<u8, String> {
    let upper = text.to_ascii_uppercase();
    let value = if let Some(pos) = spec.names.iter().position(|n| *n == upper) {
        // Month names start at 1; day names at 0.
        pos as u8 + spec.min
    } else {
        text.parse::<u8>()
            .map_err(|_| format!("invalid value {text:?} in {} field", spec.name))?
    };
    if value < spec.min || value > spec.max {
        return Err(format!(
            "value {value} out of range {}-{} in {} field",
            spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

impl Schedule {
    /// The expression this schedule was parsed from.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, date: Date) -> bool {
        let dom = self.days_of_month.contains(date.day())
            || self.day_of_month_rules.iter().any(|rule| rule.matches(date));
        let dow = self
            .days_of_week
            .contains(date.weekday().number_days_from_sunday())
            || self.day_of_week_rules.iter().any(|rule| rule.matches(date));
        match (self.any_day_of_month, self.any_day_of_week) {
            (true, true) => true,
            (false, true) => dom,
            (true, false) => dow,
            (false, false) => dom || dow,
        }
    }

    /// The first matching instant strictly after `after`, in the same offset.
    ///
    /// Returns None if nothing matches within the search horizon.
    pub fn next_after(&self, after: OffsetDateTime) -> Option<OffsetDateTime> {
        let limit = after + Duration::days(366 * SEARCH_YEARS);
        let mut t = after.replace_nanosecond(0).ok()? + Duration::SECOND;
        while t <= limit {
            if !self.months.contains(u8::from(t.month())) {
                t = start_of_next_month(t)?;
            } else if !self.day_matches(t.date()) {
                t = t.replace_time(Time::MIDNIGHT) + Duration::DAY;
            } else if !self.hours.contains(t.hour()) {
                t = t.replace_time(Time::from_hms(t.hour(), 0, 0).ok()?) + Duration::HOUR;
            } else if !self.minutes.contains(t.minute()) {
                t = t.replace_time(Time::from_hms(t.hour(), t.minute(), 0).ok()?)
                    + Duration::MINUTE;
            } else if !self.seconds.contains(t.second()) {
                t += Duration::SECOND;
            } else {
                return Some(t);
            }
        }
        None
    }
}

fn start_of_next_month(t: OffsetDateTime) -> Option<OffsetDateTime> {
    let (year, month) = match t.month() {
        Month::December => (t.year() + 1, Month::January),
        m => (t.year(), m.next()),
    };
    let date = Date::from_calendar_date(year, month, 1).ok()?;
    Some(date.with_time(Time::MIDNIGHT).assume_offset(t.offset()))
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schedule").field(&self.expression).finish()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// A schedule and the next time it's due.
#[derive(Clone, Debug)]
pub struct ScheduleState {
    schedule: Schedule,
    next_execution: OffsetDateTime,
}

/// Parse `expression` and compute its first run after `now`.
///
/// Fails if the expression is malformed or never fires.
pub fn check_schedule(expression: &str, now: OffsetDateTime) -> Result<ScheduleState> {
    let schedule: Schedule = expression.parse()?;
    let state = ScheduleState::new(schedule, now)?;
    info!(
        "Configured the backup schedule {:?}; next run at {}",
        expression, state.next_execution
    );
    Ok(state)
}

impl ScheduleState {
    pub fn new(schedule: Schedule, now: OffsetDateTime) -> Result<ScheduleState> {
        let next_execution = schedule
            .next_after(now)
            .ok_or_else(|| Error::InvalidSchedule {
                expression: schedule.expression.clone(),
                reason: format!("never fires in the next {SEARCH_YEARS} years"),
            })?;
        Ok(ScheduleState {
            schedule,
            next_execution,
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// When the schedule will next fire.
    pub fn next_execution(&self) -> OffsetDateTime {
        self.next_execution
    }

    /// Return true if `now` is past the next execution time, and if so
    /// advance the next execution to the first match after `now`.
    pub fn poll(&mut self, now: OffsetDateTime) -> bool {
        if now <= self.next_execution {
            return false;
        }
        match self.schedule.next_after(now) {
            Some(next) => self.next_execution = next,
            // Can't happen for a schedule that fired once, unless time jumps
            // far ahead; don't fire again until it's a year past `now`.
            None => self.next_execution = now + Duration::days(365),
        }
        true
    }
}
