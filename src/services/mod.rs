pub mod booking;
pub mod eta;
pub mod schedule;

use chrono::{Local, NaiveDateTime};

/// Wall-clock time in the server's zone, the zone bus timetables are written in.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}
