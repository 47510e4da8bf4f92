use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::error::AppError;
use crate::models::{Bus, RouteStop};
use crate::services::schedule;

pub const NOT_STARTED: &str = "The bus has not started yet.";
pub const ARRIVED: &str = "The bus has reached its destination.";

/// Where a bus is relative to a stop on its route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Eta {
    NotStarted {
        message: String,
    },
    Arrived {
        message: String,
    },
    EnRoute {
        last_passed_stop: RouteStop,
        message: String,
        remaining_hours: i64,
        remaining_minutes: i64,
    },
}

/// Estimates arrival at `stop_name` (matched case-insensitively) as of `now`.
pub fn estimate(bus: &Bus, stop_name: &str, now: NaiveDateTime) -> Result<Eta, AppError> {
    let target_index = bus
        .route_details
        .iter()
        .position(|stop| stop.stop_name.eq_ignore_ascii_case(stop_name.trim()))
        .ok_or_else(|| AppError::not_found(format!("Stop {stop_name} not found in route")))?;

    let times = std::iter::once(bus.departure.as_str())
        .chain(bus.route_details.iter().map(|stop| stop.arrival_time.as_str()))
        .chain(std::iter::once(bus.arrival.as_str()));
    let stamps = schedule::timeline(bus.journey_date, times)?;

    let departure = stamps[0];
    let arrival = stamps[stamps.len() - 1];
    let stop_times = &stamps[1..stamps.len() - 1];

    if now < departure {
        return Ok(Eta::NotStarted { message: NOT_STARTED.to_string() });
    }
    if now >= arrival {
        return Ok(Eta::Arrived { message: ARRIVED.to_string() });
    }

    let mut last_passed = 0;
    for (index, stop_time) in stop_times.iter().enumerate() {
        if now > *stop_time {
            last_passed = index;
        } else {
            break;
        }
    }

    let last_stop = &bus.route_details[last_passed];
    let target = &bus.route_details[target_index];
    let remaining = stop_times[target_index] - now;

    if remaining < Duration::zero() {
        return Ok(Eta::EnRoute {
            last_passed_stop: last_stop.clone(),
            message: format!(
                "The bus last passed {} at {} and already passed {} at {}.",
                last_stop.stop_name, last_stop.arrival_time, target.stop_name, target.arrival_time
            ),
            remaining_hours: 0,
            remaining_minutes: 0,
        });
    }

    let total_minutes = remaining.num_minutes();
    Ok(Eta::EnRoute {
        last_passed_stop: last_stop.clone(),
        message: format!(
            "The bus last passed {} at {} and will arrive at {} at {}.",
            last_stop.stop_name, last_stop.arrival_time, target.stop_name, target.arrival_time
        ),
        remaining_hours: total_minutes / 60,
        remaining_minutes: total_minutes % 60,
    })
}
