//! Seat ledger properties.
//!
//! Drives a bus through random sequences of explicit bookings, random-count
//! bookings and cancellations using the same rules the transactional service
//! applies, and checks the ledger after every step.
//!
//! Run with: `cargo test --test seat_ledger_test`

use bus_booking::error::AppError;
use bus_booking::models::{Bus, BusStatus, OccupancyLevel};
use bus_booking::services::booking::{check_requested_seats, ensure_cancellable, pick_free_seats};
use chrono::{NaiveDate, Utc};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

fn bus(capacity: i32) -> Bus {
    Bus {
        id: Uuid::new_v4(),
        name: "Night Rider".into(),
        bus_number: "MH-12-0042".into(),
        from_city: "Pune".into(),
        to_city: "Goa".into(),
        departure: "10:00 PM".into(),
        arrival: "06:00 AM".into(),
        journey_date: NaiveDate::from_ymd_opt(2024, 11, 2).unwrap(),
        capacity,
        rows: 10,
        columns: 4,
        price: 1200.0,
        seats_booked: vec![],
        occupancy_level: OccupancyLevel::Green,
        status: BusStatus::YetToStart,
        route_details: vec![],
        created_at: Utc::now(),
    }
}

#[derive(Debug, Clone)]
enum Op {
    Explicit(Vec<i64>),
    Count(i64),
    Cancel(usize),
}

fn op(capacity: i32) -> impl Strategy<Value = Op> {
    let cap = i64::from(capacity);
    prop_oneof![
        prop::collection::vec(-2..=cap + 2, 0..6).prop_map(Op::Explicit),
        (-1..=cap + 1).prop_map(Op::Count),
        any::<usize>().prop_map(Op::Cancel),
    ]
}

fn seats(numbers: &[i64]) -> Vec<Value> {
    numbers.iter().copied().map(Value::from).collect()
}

fn assert_ledger(bus: &Bus, active: &[Vec<i32>]) {
    let mut union = HashSet::new();
    for seats in active {
        for seat in seats {
            assert!((1..=bus.capacity).contains(seat), "seat {seat} out of range");
            assert!(union.insert(*seat), "seat {seat} held by two bookings");
        }
    }
    let ledger: HashSet<i32> = bus.seats_booked.iter().copied().collect();
    assert_eq!(ledger.len(), bus.seats_booked.len(), "ledger has duplicates");
    assert_eq!(ledger, union);
    assert!(bus.seats_booked.len() <= bus.capacity as usize);
    assert_eq!(
        bus.occupancy_level,
        OccupancyLevel::from_counts(bus.seats_booked.len(), bus.capacity)
    );
}

proptest! {
    #[test]
    fn bookings_never_overlap(capacity in 1i32..24, seed in any::<u64>(), ops in prop::collection::vec(op(24), 1..40)) {
        let mut bus = bus(capacity);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut active: Vec<Vec<i32>> = Vec::new();

        for op in ops {
            let before = bus.seats_booked.clone();
            let result = match op {
                Op::Explicit(requested) => check_requested_seats(&bus, &seats(&requested)),
                Op::Count(count) => pick_free_seats(&bus, count, &mut rng),
                Op::Cancel(index) => {
                    if !active.is_empty() {
                        let seats = active.remove(index % active.len());
                        bus.release(&seats);
                    }
                    assert_ledger(&bus, &active);
                    continue;
                }
            };

            match result {
                Ok(granted) => {
                    bus.reserve(&granted);
                    active.push(granted);
                }
                Err(_) => prop_assert_eq!(&bus.seats_booked, &before),
            }
            assert_ledger(&bus, &active);
        }
    }

    #[test]
    fn out_of_range_seats_are_validation_errors(capacity in 1i32..60, seat in prop_oneof![-50i64..=0, 61i64..200]) {
        let bus = bus(capacity);
        let err = check_requested_seats(&bus, &seats(&[seat])).unwrap_err();
        prop_assert!(matches!(err, AppError::Validation(_)));
    }
}

#[test]
fn count_equal_to_remaining_fills_the_bus() {
    let mut bus = bus(40);
    bus.reserve(&[1, 2, 3]);
    let mut rng = ChaCha8Rng::seed_from_u64(99);

    assert!(matches!(pick_free_seats(&bus, 38, &mut rng), Err(AppError::Conflict(_))));

    let seats = pick_free_seats(&bus, 37, &mut rng).unwrap();
    bus.reserve(&seats);
    assert_eq!(bus.remaining_seats(), 0);
    assert!(bus.free_seats().is_empty());
    assert_eq!(bus.occupancy_level, OccupancyLevel::Red);
}

#[test]
fn taken_seat_is_a_conflict_and_free_seats_go_through() {
    let mut bus = bus(40);
    bus.reserve(&[1, 2, 3]);

    let err = check_requested_seats(&bus, &seats(&[2, 5])).unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(err.to_string(), "Seat 2 is already booked.");
    assert_eq!(bus.seats_booked, vec![1, 2, 3]);

    let chosen = check_requested_seats(&bus, &seats(&[5, 6])).unwrap();
    bus.reserve(&chosen);
    assert_eq!(bus.seats_booked, vec![1, 2, 3, 5, 6]);
    assert_eq!(bus.occupancy_level, OccupancyLevel::Green);
}

#[test]
fn started_journeys_keep_their_seats() {
    for status in [BusStatus::Running, BusStatus::Completed] {
        let mut bus = bus(10);
        bus.reserve(&[4, 5]);
        bus.status = status;
        let err = ensure_cancellable(&bus).unwrap_err();
        assert!(matches!(err, AppError::StateConflict(ref m) if m == "Bus journey started already"));
        assert_eq!(bus.seats_booked, vec![4, 5]);
    }
}
