//! Timetable arithmetic shared by the status lifecycle and the ETA estimator.
//!
//! Buses store times of day as text (`"09:00 AM"`) next to a calendar
//! journey date; everything here turns those into comparable timestamps.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::AppError;
use crate::models::BusStatus;

/// A bus is considered done once it is less than this far from departure.
pub fn completion_window() -> Duration {
    Duration::hours(1)
}

/// Parses `"09:00 AM"`, `"9:00pm"` or 24-hour `"21:00"`.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, AppError> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();

    for format in ["%I:%M %p", "%I:%M%p", "%H:%M", "%H:%M:%S"] {
        if let Ok(time) = NaiveTime::parse_from_str(&upper, format) {
            return Ok(time);
        }
    }

    Err(AppError::validation(format!(
        "Invalid time '{trimmed}'. Expected a time like '09:30 AM'"
    )))
}

/// Journey date combined with a time of day.
pub fn at(date: NaiveDate, time_of_day: &str) -> Result<NaiveDateTime, AppError> {
    Ok(date.and_time(parse_time_of_day(time_of_day)?))
}

/// How far a time may fall behind its predecessor and still be on the same day.
fn rollover_gap() -> Duration {
    Duration::hours(12)
}

/// Timestamps for an ordered list of times of day starting on `date`.
/// Small steps backwards stay on the same day (a boarding point listed a few
/// minutes before departure); a time more than twelve hours behind its
/// predecessor is taken to be on the following day.
pub fn timeline<'a, I>(date: NaiveDate, times: I) -> Result<Vec<NaiveDateTime>, AppError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut stamps: Vec<NaiveDateTime> = Vec::new();
    let mut day = date;

    for raw in times {
        let time = parse_time_of_day(raw)?;
        if let Some(previous) = stamps.last() {
            if *previous - day.and_time(time) > rollover_gap() {
                day = day.succ_opt().unwrap_or(day);
            }
        }
        stamps.push(day.and_time(time));
    }

    Ok(stamps)
}

/// Read-time status transition. Completed is terminal, and any bus within the
/// completion window of its departure (or past it) becomes Completed.
pub fn resolve_status(
    current: BusStatus,
    departure: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> BusStatus {
    if current == BusStatus::Completed {
        return current;
    }
    match departure {
        Some(departure) if departure - now < completion_window() => BusStatus::Completed,
        _ => current,
    }
}

/// Admin edits may only move the lifecycle forward.
pub fn check_transition(from: BusStatus, to: BusStatus) -> Result<(), AppError> {
    if to < from {
        return Err(AppError::validation(format!(
            "Bus status cannot move from {from} to {to}"
        )));
    }
    Ok(())
}
