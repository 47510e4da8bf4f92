use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::AuthUser,
    models::{Booking, BookingDetails, Bus, User},
    response::ApiResponse,
    services::local_now,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/book-seat", post(book_seat))
        .route("/book-n-seat", post(book_number_of_seats))
        .route("/get-all-bookings", get(get_all_bookings))
        .route("/{user_id}", get(get_bookings_by_user))
        .route("/{booking_id}/{user_id}/{bus_id}", delete(cancel_booking))
}

/* ---------- helpers ---------- */

/// Resolves the bus and user of each booking in two queries.
async fn with_details(
    state: &AppState,
    bookings: Vec<Booking>,
) -> Result<Vec<BookingDetails>, AppError> {
    let bus_ids: Vec<Uuid> = bookings.iter().map(|b| b.bus_id).collect();
    let user_ids: Vec<Uuid> = bookings.iter().map(|b| b.user_id).collect();

    let buses: HashMap<Uuid, Bus> = Bus::find_by_ids(&state.db.pool, &bus_ids)
        .await?
        .into_iter()
        .map(|bus| (bus.id, bus))
        .collect();
    let users: HashMap<Uuid, _> = User::summaries(&state.db.pool, &user_ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    Ok(bookings
        .into_iter()
        .map(|booking| BookingDetails {
            id: booking.id,
            seats: booking.seats,
            created_at: booking.created_at,
            bus: buses.get(&booking.bus_id).cloned(),
            user: users.get(&booking.user_id).cloned(),
        })
        .collect())
}

/* ---------- BOOK ---------- */

// POST /api/bookings/book-seat
#[derive(Debug, Deserialize)]
struct BookSeatRequest {
    bus: Uuid,
    #[serde(default)]
    seats: Vec<Value>,
}

async fn book_seat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<BookSeatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;

    // Seat entries stay raw JSON until the bus is loaded; type and range are checked together
    let outcome = state
        .bookings
        .book_seats(user.user_id, req.bus, &req.seats, local_now())
        .await?;
    state.cache.invalidate_bus(outcome.bus.id).await;

    Ok(ApiResponse::ok("Seat booked successfully", outcome.booking))
}

// POST /api/bookings/book-n-seat
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookCountRequest {
    bus: Uuid,
    #[serde(default)]
    number_of_seats: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookCountResponse {
    booking: Booking,
    assigned_seats: Vec<i32>,
}

async fn book_number_of_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<BookCountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let count = req
        .number_of_seats
        .as_i64()
        .ok_or_else(|| AppError::validation("Invalid number of seats provided"))?;

    let outcome = state
        .bookings
        .book_seat_count(user.user_id, req.bus, count, local_now())
        .await?;
    state.cache.invalidate_bus(outcome.bus.id).await;

    let assigned_seats = outcome.booking.seats.clone();
    Ok(ApiResponse::ok(
        "Seats booked successfully",
        BookCountResponse { booking: outcome.booking, assigned_seats },
    ))
}

/* ---------- LIST ---------- */

// GET /api/bookings/get-all-bookings
async fn get_all_bookings(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let bookings = Booking::list_all(&state.db.pool).await?;
    let details = with_details(&state, bookings).await?;
    Ok(ApiResponse::ok("All bookings", details))
}

// GET /api/bookings/{user_id}
async fn get_bookings_by_user(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(user_id) = path?;
    user.ensure_can_act_for(user_id)?;

    let bookings = Booking::list_by_user(&state.db.pool, user_id).await?;
    let details = with_details(&state, bookings).await?;
    Ok(ApiResponse::ok("Bookings fetched successfully", details))
}

/* ---------- CANCEL ---------- */

// DELETE /api/bookings/{booking_id}/{user_id}/{bus_id}
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    path: Result<Path<(Uuid, Uuid, Uuid)>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path((booking_id, user_id, bus_id)) = path?;
    user.ensure_can_act_for(user_id)?;

    let outcome = state
        .bookings
        .cancel(booking_id, user_id, bus_id, local_now())
        .await?;
    state.cache.invalidate_bus(bus_id).await;

    Ok(ApiResponse::ok("Booking cancelled successfully", outcome.booking))
}
