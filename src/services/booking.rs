//! booking.rs
//!
//! Seat allocation for buses. Every booking and cancellation runs as one
//! Postgres transaction that row-locks the bus (`SELECT ... FOR UPDATE`), so
//! concurrent requests against the same bus are serialized by the store no
//! matter which worker process serves them. Any error before `commit` drops
//! the transaction, which rolls back both the booking row and the seat ledger.
//!
//! The validation rules are plain functions over [`Bus`] so they can be
//! exercised without a database.

use chrono::NaiveDateTime;
use rand::{seq::SliceRandom, Rng};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::{
    database::Database,
    error::AppError,
    models::{Booking, Bus, BusStatus, User},
};

/// Result of a committed booking: the new record and the bus as written.
#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub booking: Booking,
    pub bus: Bus,
}

// --- Validation rules ---

/// Checks an explicit seat request against the bus and returns the seats as stored.
/// Entries arrive as raw JSON; anything but a whole number in `1..=capacity` is invalid.
pub fn check_requested_seats(bus: &Bus, requested: &[Value]) -> Result<Vec<i32>, AppError> {
    if requested.is_empty() {
        return Err(AppError::validation("No seats provided"));
    }

    let capacity = i64::from(bus.capacity);
    let mut seen = HashSet::with_capacity(requested.len());
    let mut seats = Vec::with_capacity(requested.len());
    for value in requested {
        let Some(seat) = value.as_i64().filter(|seat| (1..=capacity).contains(seat)) else {
            return Err(invalid_seat(seat_label(value), bus.capacity));
        };
        let seat = seat as i32;
        if !seen.insert(seat) {
            return Err(AppError::validation(format!(
                "Duplicate seat number: {seat}. All seat numbers must be unique."
            )));
        }
        seats.push(seat);
    }

    let booked: HashSet<i32> = bus.seats_booked.iter().copied().collect();
    let taken: Vec<i32> = seats.iter().copied().filter(|seat| booked.contains(seat)).collect();
    if !taken.is_empty() {
        return Err(AppError::conflict(already_booked_message(&taken)));
    }

    if seats.len() > bus.remaining_seats() {
        return Err(AppError::conflict("Not enough seats available"));
    }

    Ok(seats)
}

pub fn invalid_seat(seat: impl std::fmt::Display, capacity: i32) -> AppError {
    AppError::validation(format!(
        "Invalid seat number: {seat}. Must be greater than 0 and less than or equal to capacity ({capacity})."
    ))
}

fn seat_label(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn already_booked_message(taken: &[i32]) -> String {
    match taken {
        [seat] => format!("Seat {seat} is already booked."),
        many => {
            let list: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("Seats {} are already booked.", list.join(", "))
        }
    }
}

/// Draws `count` distinct free seats uniformly at random.
pub fn pick_free_seats<R: Rng + ?Sized>(
    bus: &Bus,
    count: i64,
    rng: &mut R,
) -> Result<Vec<i32>, AppError> {
    if count <= 0 {
        return Err(AppError::validation("Invalid number of seats provided"));
    }
    if count as u64 > bus.remaining_seats() as u64 {
        return Err(AppError::conflict("Not enough seats available"));
    }

    let free = bus.free_seats();
    Ok(free.choose_multiple(rng, count as usize).copied().collect())
}

pub fn ensure_bookable(bus: &Bus) -> Result<(), AppError> {
    if bus.status == BusStatus::Completed {
        return Err(AppError::state_conflict("Bus journey has already completed"));
    }
    Ok(())
}

pub fn ensure_cancellable(bus: &Bus) -> Result<(), AppError> {
    if bus.status != BusStatus::YetToStart {
        return Err(AppError::state_conflict("Bus journey started already"));
    }
    Ok(())
}

// --- Transactions ---

#[derive(Clone)]
pub struct BookingService {
    db: Database,
}

impl BookingService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Books the exact seat numbers in `requested`.
    pub async fn book_seats(
        &self,
        user_id: Uuid,
        bus_id: Uuid,
        requested: &[Value],
        now: NaiveDateTime,
    ) -> Result<BookingOutcome, AppError> {
        let mut tx = self.db.pool.begin().await?;
        let bus = lock_bookable_bus(&mut tx, user_id, bus_id, now).await?;

        let seats = check_requested_seats(&bus, requested)?;
        commit_booking(tx, bus, user_id, seats).await
    }

    /// Books `count` seats chosen at random among the free ones.
    pub async fn book_seat_count(
        &self,
        user_id: Uuid,
        bus_id: Uuid,
        count: i64,
        now: NaiveDateTime,
    ) -> Result<BookingOutcome, AppError> {
        let mut tx = self.db.pool.begin().await?;
        let bus = lock_bookable_bus(&mut tx, user_id, bus_id, now).await?;

        let seats = pick_free_seats(&bus, count, &mut rand::thread_rng())?;
        commit_booking(tx, bus, user_id, seats).await
    }

    /// Deletes a booking and hands its seats back to the bus.
    pub async fn cancel(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        bus_id: Uuid,
        now: NaiveDateTime,
    ) -> Result<BookingOutcome, AppError> {
        let mut tx = self.db.pool.begin().await?;

        let bus = Bus::find_for_update(&mut *tx, bus_id).await?;
        let booking = Booking::find_by_id(&mut *tx, booking_id).await?;
        let user_exists = User::exists(&mut *tx, user_id).await?;

        let (Some(mut bus), Some(booking), true) = (bus, booking, user_exists) else {
            return Err(AppError::not_found("Booking, User, or Bus not found"));
        };
        if booking.bus_id != bus.id || booking.user_id != user_id {
            return Err(AppError::not_found("Booking not found for this user and bus"));
        }

        bus.refresh_status(now);
        ensure_cancellable(&bus)?;

        if !Booking::delete(&mut *tx, booking.id).await? {
            return Err(AppError::not_found("Booking not found"));
        }
        bus.release(&booking.seats);
        bus.save_seats(&mut *tx).await?;
        tx.commit().await?;

        info!(
            booking_id = %booking.id,
            bus_id = %bus.id,
            seats = booking.seats.len(),
            "booking cancelled"
        );
        Ok(BookingOutcome { booking, bus })
    }
}

async fn lock_bookable_bus(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    bus_id: Uuid,
    now: NaiveDateTime,
) -> Result<Bus, AppError> {
    if !User::exists(&mut **tx, user_id).await? {
        return Err(AppError::not_found("User not found"));
    }
    let mut bus = Bus::find_for_update(&mut **tx, bus_id)
        .await?
        .ok_or_else(|| AppError::not_found("Bus not found"))?;

    bus.refresh_status(now);
    ensure_bookable(&bus)?;
    Ok(bus)
}

async fn commit_booking(
    mut tx: Transaction<'_, Postgres>,
    mut bus: Bus,
    user_id: Uuid,
    seats: Vec<i32>,
) -> Result<BookingOutcome, AppError> {
    let booking = Booking::new(bus.id, user_id, seats);
    booking.insert(&mut *tx).await?;

    bus.reserve(&booking.seats);
    bus.save_seats(&mut *tx).await?;
    tx.commit().await?;

    info!(
        booking_id = %booking.id,
        bus_id = %bus.id,
        seats = ?booking.seats,
        occupancy = ?bus.occupancy_level,
        "seats booked"
    );
    Ok(BookingOutcome { booking, bus })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bus::tests::sample_bus;
    use crate::models::OccupancyLevel;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn seats(numbers: &[i64]) -> Vec<Value> {
        numbers.iter().copied().map(Value::from).collect()
    }

    #[test]
    fn rejects_a_seat_that_is_taken() {
        let bus = sample_bus(40, &[1, 2, 3]);
        let err = check_requested_seats(&bus, &seats(&[2, 5])).unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref msg) if msg == "Seat 2 is already booked."));
    }

    #[test]
    fn lists_every_taken_seat() {
        let bus = sample_bus(40, &[1, 2, 3]);
        let err = check_requested_seats(&bus, &seats(&[3, 1, 9])).unwrap_err();
        assert_eq!(err.to_string(), "Seats 3, 1 are already booked.");
    }

    #[test]
    fn accepts_free_seats_and_updates_occupancy() {
        let mut bus = sample_bus(40, &[1, 2, 3]);
        let chosen = check_requested_seats(&bus, &seats(&[5, 6])).unwrap();
        bus.reserve(&chosen);
        assert_eq!(bus.seats_booked, vec![1, 2, 3, 5, 6]);
        assert_eq!(bus.occupancy_level, OccupancyLevel::Green);
    }

    #[test]
    fn validates_range_duplicates_and_emptiness() {
        let bus = sample_bus(10, &[]);
        assert_eq!(check_requested_seats(&bus, &seats(&[])).unwrap_err().to_string(), "No seats provided");
        assert_eq!(
            check_requested_seats(&bus, &seats(&[0])).unwrap_err().to_string(),
            "Invalid seat number: 0. Must be greater than 0 and less than or equal to capacity (10)."
        );
        assert!(matches!(check_requested_seats(&bus, &seats(&[11])), Err(AppError::Validation(_))));
        assert_eq!(
            check_requested_seats(&bus, &seats(&[4, 4])).unwrap_err().to_string(),
            "Duplicate seat number: 4. All seat numbers must be unique."
        );
    }

    #[test]
    fn non_integer_seats_use_the_range_message() {
        let bus = sample_bus(10, &[]);
        let expected = |seat: &str| {
            format!("Invalid seat number: {seat}. Must be greater than 0 and less than or equal to capacity (10).")
        };
        assert_eq!(check_requested_seats(&bus, &[json!(2.5)]).unwrap_err().to_string(), expected("2.5"));
        assert_eq!(check_requested_seats(&bus, &[json!("x")]).unwrap_err().to_string(), expected("x"));
        assert_eq!(check_requested_seats(&bus, &[json!(null)]).unwrap_err().to_string(), expected("null"));
    }

    #[test]
    fn seats_are_checked_in_request_order() {
        let bus = sample_bus(10, &[]);
        let err = check_requested_seats(&bus, &[json!(0), json!("x")]).unwrap_err();
        assert!(err.to_string().starts_with("Invalid seat number: 0."));
    }

    #[test]
    fn random_pick_exhausts_remaining_seats() {
        let mut bus = sample_bus(12, &[1, 4, 7]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut seats = pick_free_seats(&bus, 9, &mut rng).unwrap();
        bus.reserve(&seats);
        seats.sort_unstable();
        assert_eq!(seats, vec![2, 3, 5, 6, 8, 9, 10, 11, 12]);
        assert_eq!(bus.remaining_seats(), 0);
        assert_eq!(bus.occupancy_level, OccupancyLevel::Red);
    }

    #[test]
    fn random_pick_rejects_bad_counts() {
        let bus = sample_bus(5, &[1, 2]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(matches!(pick_free_seats(&bus, 0, &mut rng), Err(AppError::Validation(_))));
        assert!(matches!(pick_free_seats(&bus, -2, &mut rng), Err(AppError::Validation(_))));
        assert!(matches!(pick_free_seats(&bus, 4, &mut rng), Err(AppError::Conflict(_))));
    }

    #[test]
    fn random_pick_reaches_every_free_seat() {
        let bus = sample_bus(6, &[3]);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut hits = [0u32; 7];
        for _ in 0..2_000 {
            for seat in pick_free_seats(&bus, 1, &mut rng).unwrap() {
                hits[seat as usize] += 1;
            }
        }
        assert_eq!(hits[3], 0);
        for seat in [1, 2, 4, 5, 6] {
            assert!(hits[seat] > 300, "seat {seat} drawn {} times", hits[seat]);
        }
    }

    #[test]
    fn cancellation_requires_a_bus_that_has_not_started() {
        let mut bus = sample_bus(40, &[1]);
        assert!(ensure_cancellable(&bus).is_ok());
        bus.status = BusStatus::Running;
        assert!(matches!(ensure_cancellable(&bus), Err(AppError::StateConflict(_))));
        assert!(ensure_bookable(&bus).is_ok());
        bus.status = BusStatus::Completed;
        assert!(matches!(ensure_bookable(&bus), Err(AppError::StateConflict(_))));
    }
}
