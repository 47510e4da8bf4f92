use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

use super::{Bus, UserSummary};

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub bus_id: Uuid,
    pub user_id: Uuid,
    pub seats: Vec<i32>,
    pub created_at: DateTime<Utc>,
}

/// Booking with its bus and user resolved, as returned by the listing endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetails {
    pub id: Uuid,
    pub seats: Vec<i32>,
    pub created_at: DateTime<Utc>,
    pub bus: Option<Bus>,
    pub user: Option<UserSummary>,
}

impl Booking {
    pub fn new(bus_id: Uuid, user_id: Uuid, seats: Vec<i32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bus_id,
            user_id,
            seats,
            created_at: Utc::now(),
        }
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(
            "SELECT id, bus_id, user_id, seats, created_at FROM bookings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn list_all<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(
            "SELECT id, bus_id, user_id, seats, created_at FROM bookings ORDER BY created_at DESC",
        )
        .fetch_all(executor)
        .await
    }

    pub async fn list_by_user<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: Uuid,
    ) -> Result<Vec<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(
            "SELECT id, bus_id, user_id, seats, created_at FROM bookings
             WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(executor)
        .await
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO bookings (id, bus_id, user_id, seats, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(self.id)
        .bind(self.bus_id)
        .bind(self.user_id)
        .bind(&self.seats)
        .bind(self.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
