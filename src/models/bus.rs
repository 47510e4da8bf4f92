use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::services::schedule;

/// Journey lifecycle. Variant order is the only allowed direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bus_status")]
pub enum BusStatus {
    #[serde(rename = "Yet to start")]
    #[sqlx(rename = "Yet to start")]
    YetToStart,
    Running,
    Completed,
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusStatus::YetToStart => "Yet to start",
            BusStatus::Running => "Running",
            BusStatus::Completed => "Completed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "occupancy_level")]
pub enum OccupancyLevel {
    Green,
    Yellow,
    Red,
}

impl OccupancyLevel {
    /// Traffic-light band for `booked` out of `capacity` seats.
    pub fn from_counts(booked: usize, capacity: i32) -> Self {
        if capacity <= 0 {
            return OccupancyLevel::Red;
        }
        let percentage = booked as f64 / capacity as f64 * 100.0;
        if percentage <= 60.0 {
            OccupancyLevel::Green
        } else if percentage <= 90.0 {
            OccupancyLevel::Yellow
        } else {
            OccupancyLevel::Red
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub stop_name: String,
    pub distance_from_start: f64,
    pub arrival_time: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: Uuid,
    pub name: String,
    pub bus_number: String,
    #[serde(rename = "from")]
    pub from_city: String,
    #[serde(rename = "to")]
    pub to_city: String,
    pub departure: String,
    pub arrival: String,
    pub journey_date: NaiveDate,
    pub capacity: i32,
    pub rows: i32,
    pub columns: i32,
    pub price: f64,
    pub seats_booked: Vec<i32>,
    pub occupancy_level: OccupancyLevel,
    pub status: BusStatus,
    #[sqlx(json)]
    pub route_details: Vec<RouteStop>,
    pub created_at: DateTime<Utc>,
}

const BUS_COLUMNS: &str = "id, name, bus_number, from_city, to_city, departure, arrival, \
     journey_date, capacity, rows, columns, price, seats_booked, occupancy_level, status, \
     route_details, created_at";

/// Orders by departure time of day. Stored times are text, so SQL ordering would be lexical.
pub fn sort_by_departure(buses: &mut [Bus]) {
    buses.sort_by_key(|bus| (bus.departure_at(), bus.created_at));
}

impl Bus {
    pub fn remaining_seats(&self) -> usize {
        (self.capacity.max(0) as usize).saturating_sub(self.seats_booked.len())
    }

    /// Seat numbers in `1..=capacity` not yet booked, ascending.
    pub fn free_seats(&self) -> Vec<i32> {
        let booked: HashSet<i32> = self.seats_booked.iter().copied().collect();
        (1..=self.capacity).filter(|seat| !booked.contains(seat)).collect()
    }

    pub fn reserve(&mut self, seats: &[i32]) {
        self.seats_booked.extend_from_slice(seats);
        self.recompute_occupancy();
    }

    pub fn release(&mut self, seats: &[i32]) {
        let released: HashSet<i32> = seats.iter().copied().collect();
        self.seats_booked.retain(|seat| !released.contains(seat));
        self.recompute_occupancy();
    }

    pub fn recompute_occupancy(&mut self) {
        self.occupancy_level = OccupancyLevel::from_counts(self.seats_booked.len(), self.capacity);
    }

    /// Scheduled departure as a full timestamp, if the stored time parses.
    pub fn departure_at(&self) -> Option<NaiveDateTime> {
        schedule::at(self.journey_date, &self.departure).ok()
    }

    /// Applies the read-time status transition. Returns true when the status changed.
    pub fn refresh_status(&mut self, now: NaiveDateTime) -> bool {
        let next = schedule::resolve_status(self.status, self.departure_at(), now);
        let changed = next != self.status;
        self.status = next;
        changed
    }

    // === Queries ===

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Bus>, sqlx::Error> {
        sqlx::query_as::<_, Bus>(&format!("SELECT {BUS_COLUMNS} FROM buses WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Row-locks the bus until the surrounding transaction ends.
    pub async fn find_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Bus>, sqlx::Error> {
        sqlx::query_as::<_, Bus>(&format!(
            "SELECT {BUS_COLUMNS} FROM buses WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_ids<'e, E: PgExecutor<'e>>(
        executor: E,
        ids: &[Uuid],
    ) -> Result<Vec<Bus>, sqlx::Error> {
        sqlx::query_as::<_, Bus>(&format!("SELECT {BUS_COLUMNS} FROM buses WHERE id = ANY($1)"))
            .bind(ids)
            .fetch_all(executor)
            .await
    }

    pub async fn number_exists<'e, E: PgExecutor<'e>>(
        executor: E,
        bus_number: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM buses WHERE bus_number = $1)")
            .bind(bus_number)
            .fetch_one(executor)
            .await
    }

    pub async fn list_all<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<Bus>, sqlx::Error> {
        sqlx::query_as::<_, Bus>(&format!(
            "SELECT {BUS_COLUMNS} FROM buses ORDER BY journey_date, created_at"
        ))
        .fetch_all(executor)
        .await
    }

    pub async fn list_upcoming<'e, E: PgExecutor<'e>>(
        executor: E,
        from_date: NaiveDate,
    ) -> Result<Vec<Bus>, sqlx::Error> {
        sqlx::query_as::<_, Bus>(&format!(
            "SELECT {BUS_COLUMNS} FROM buses
             WHERE journey_date >= $1 AND status <> 'Completed'
             ORDER BY journey_date"
        ))
        .bind(from_date)
        .fetch_all(executor)
        .await
    }

    pub async fn find_by_route<'e, E: PgExecutor<'e>>(
        executor: E,
        from_city: &str,
        to_city: &str,
        journey_date: NaiveDate,
    ) -> Result<Vec<Bus>, sqlx::Error> {
        let mut buses = sqlx::query_as::<_, Bus>(&format!(
            "SELECT {BUS_COLUMNS} FROM buses
             WHERE from_city = $1 AND to_city = $2 AND journey_date = $3"
        ))
        .bind(from_city)
        .bind(to_city)
        .bind(journey_date)
        .fetch_all(executor)
        .await?;
        sort_by_departure(&mut buses);
        Ok(buses)
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO buses (id, name, bus_number, from_city, to_city, departure, arrival,
                                journey_date, capacity, rows, columns, price, seats_booked,
                                occupancy_level, status, route_details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.bus_number)
        .bind(&self.from_city)
        .bind(&self.to_city)
        .bind(&self.departure)
        .bind(&self.arrival)
        .bind(self.journey_date)
        .bind(self.capacity)
        .bind(self.rows)
        .bind(self.columns)
        .bind(self.price)
        .bind(&self.seats_booked)
        .bind(self.occupancy_level)
        .bind(self.status)
        .bind(sqlx::types::Json(&self.route_details))
        .bind(self.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Persists the seat ledger (booked seats and occupancy).
    pub async fn save_seats<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE buses SET seats_booked = $2, occupancy_level = $3 WHERE id = $1")
            .bind(self.id)
            .bind(&self.seats_booked)
            .bind(self.occupancy_level)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Persists every admin-editable field.
    pub async fn save_details<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE buses
             SET name = $2, bus_number = $3, from_city = $4, to_city = $5, departure = $6,
                 arrival = $7, journey_date = $8, capacity = $9, rows = $10, columns = $11,
                 price = $12, occupancy_level = $13, status = $14, route_details = $15
             WHERE id = $1",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.bus_number)
        .bind(&self.from_city)
        .bind(&self.to_city)
        .bind(&self.departure)
        .bind(&self.arrival)
        .bind(self.journey_date)
        .bind(self.capacity)
        .bind(self.rows)
        .bind(self.columns)
        .bind(self.price)
        .bind(self.occupancy_level)
        .bind(self.status)
        .bind(sqlx::types::Json(&self.route_details))
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Marks buses completed. Never touches a bus that already is.
    pub async fn mark_completed<'e, E: PgExecutor<'e>>(
        executor: E,
        ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE buses SET status = 'Completed' WHERE id = ANY($1) AND status <> 'Completed'",
        )
        .bind(ids)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM buses WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_bus(capacity: i32, booked: &[i32]) -> Bus {
        let mut bus = Bus {
            id: Uuid::new_v4(),
            name: "Shatabdi Express".into(),
            bus_number: "UP-78-1234".into(),
            from_city: "Delhi".into(),
            to_city: "Lucknow".into(),
            departure: "09:00 AM".into(),
            arrival: "03:00 PM".into(),
            journey_date: NaiveDate::from_ymd_opt(2024, 10, 24).unwrap(),
            capacity,
            rows: 10,
            columns: 4,
            price: 750.0,
            seats_booked: booked.to_vec(),
            occupancy_level: OccupancyLevel::Green,
            status: BusStatus::YetToStart,
            route_details: vec![],
            created_at: Utc::now(),
        };
        bus.recompute_occupancy();
        bus
    }

    #[test]
    fn occupancy_band_edges() {
        assert_eq!(OccupancyLevel::from_counts(0, 40), OccupancyLevel::Green);
        assert_eq!(OccupancyLevel::from_counts(24, 40), OccupancyLevel::Green);
        assert_eq!(OccupancyLevel::from_counts(25, 40), OccupancyLevel::Yellow);
        assert_eq!(OccupancyLevel::from_counts(36, 40), OccupancyLevel::Yellow);
        assert_eq!(OccupancyLevel::from_counts(37, 40), OccupancyLevel::Red);
        assert_eq!(OccupancyLevel::from_counts(40, 40), OccupancyLevel::Red);
    }

    #[test]
    fn route_results_sort_by_clock_time() {
        let mut buses: Vec<Bus> = ["01:00 PM", "09:00 AM", "11:30 AM"]
            .into_iter()
            .map(|departure| Bus { departure: departure.into(), ..sample_bus(40, &[]) })
            .collect();
        sort_by_departure(&mut buses);
        let order: Vec<&str> = buses.iter().map(|bus| bus.departure.as_str()).collect();
        assert_eq!(order, ["09:00 AM", "11:30 AM", "01:00 PM"]);
    }

    #[test]
    fn free_seats_skip_booked() {
        let bus = sample_bus(6, &[2, 5]);
        assert_eq!(bus.free_seats(), vec![1, 3, 4, 6]);
        assert_eq!(bus.remaining_seats(), 4);
    }

    #[test]
    fn reserve_and_release_recompute_occupancy() {
        let mut bus = sample_bus(10, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(bus.occupancy_level, OccupancyLevel::Green);

        bus.reserve(&[7, 8, 9]);
        assert_eq!(bus.occupancy_level, OccupancyLevel::Yellow);

        bus.release(&[1, 2, 3, 4]);
        assert_eq!(bus.seats_booked, vec![5, 6, 7, 8, 9]);
        assert_eq!(bus.occupancy_level, OccupancyLevel::Green);
    }

    #[test]
    fn status_serializes_like_the_stored_enum() {
        let json = serde_json::to_string(&BusStatus::YetToStart).unwrap();
        assert_eq!(json, "\"Yet to start\"");
        assert_eq!(BusStatus::YetToStart.to_string(), "Yet to start");
        assert!(BusStatus::YetToStart < BusStatus::Running);
        assert!(BusStatus::Running < BusStatus::Completed);
    }

    #[test]
    fn bus_serializes_route_fields_as_from_and_to() {
        let bus = sample_bus(40, &[]);
        let value = serde_json::to_value(&bus).unwrap();
        assert_eq!(value["from"], "Delhi");
        assert_eq!(value["to"], "Lucknow");
        assert_eq!(value["busNumber"], "UP-78-1234");
        assert_eq!(value["seatsBooked"], serde_json::json!([]));
    }
}
