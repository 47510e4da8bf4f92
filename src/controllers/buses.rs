//! Bus inventory: admin CRUD, listings and the ETA lookup.
//!
//! Listings and single-bus reads apply the lazy status transition and write
//! back any bus that just became Completed.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    middleware::{AdminUser, AuthUser},
    models::{Bus, BusStatus, OccupancyLevel, RouteStop},
    response::ApiResponse,
    services::{eta, local_now, schedule},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/add-bus", post(add_bus))
        .route("/get-all-buses", get(get_all_buses))
        .route("/get", post(get_buses_by_route))
        .route("/getETA", post(get_eta))
        .route("/{id}", get(get_bus).put(update_bus).delete(delete_bus))
}

/* ---------- helpers ---------- */

fn check_schedule(departure: &str, arrival: &str, stops: &[RouteStop]) -> Result<(), AppError> {
    schedule::parse_time_of_day(departure)?;
    schedule::parse_time_of_day(arrival)?;
    for stop in stops {
        if stop.stop_name.trim().is_empty() {
            return Err(AppError::validation("Route stops need a name"));
        }
        schedule::parse_time_of_day(&stop.arrival_time)?;
    }
    Ok(())
}

fn unique_number(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("Bus already exists")
        }
        other => AppError::Database(other),
    }
}

/// Applies the read-time status transition and persists buses that changed.
async fn refresh_statuses(state: &AppState, buses: &mut [Bus]) -> Result<(), AppError> {
    let now = local_now();
    let changed: Vec<Uuid> = buses
        .iter_mut()
        .filter_map(|bus| bus.refresh_status(now).then_some(bus.id))
        .collect();

    if changed.is_empty() {
        return Ok(());
    }

    let updated = Bus::mark_completed(&state.db.pool, &changed).await?;
    tracing::info!("marked {} buses completed", updated);
    for id in changed {
        state.cache.invalidate_bus(id).await;
    }
    Ok(())
}

/* ---------- CREATE ---------- */

// POST /api/buses/add-bus
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateBusRequest {
    #[validate(length(min = 1, message = "name is required"))]
    name: String,
    #[validate(length(min = 1, message = "busNumber is required"))]
    bus_number: String,
    #[validate(length(min = 1, message = "from is required"))]
    from: String,
    #[validate(length(min = 1, message = "to is required"))]
    to: String,
    departure: String,
    arrival: String,
    journey_date: NaiveDate,
    #[validate(range(min = 1, message = "capacity must be at least 1"))]
    capacity: i32,
    #[validate(range(min = 1))]
    rows: i32,
    #[validate(range(min = 1))]
    columns: i32,
    #[validate(range(min = 0.0, message = "price cannot be negative"))]
    price: f64,
    #[serde(default)]
    route_details: Vec<RouteStop>,
}

async fn add_bus(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    payload: Result<Json<CreateBusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    req.validate()?;
    check_schedule(&req.departure, &req.arrival, &req.route_details)?;

    if Bus::number_exists(&state.db.pool, &req.bus_number).await? {
        return Err(AppError::conflict("Bus already exists"));
    }

    let bus = Bus {
        id: Uuid::new_v4(),
        name: req.name,
        bus_number: req.bus_number,
        from_city: req.from,
        to_city: req.to,
        departure: req.departure,
        arrival: req.arrival,
        journey_date: req.journey_date,
        capacity: req.capacity,
        rows: req.rows,
        columns: req.columns,
        price: req.price,
        seats_booked: Vec::new(),
        occupancy_level: OccupancyLevel::Green,
        status: BusStatus::YetToStart,
        route_details: req.route_details,
        created_at: Utc::now(),
    };
    bus.insert(&state.db.pool).await.map_err(unique_number)?;

    tracing::info!(bus_id = %bus.id, bus_number = %bus.bus_number, "bus created");
    Ok(ApiResponse::ok("Bus created successfully", bus))
}

/* ---------- READ ---------- */

// GET /api/buses/get-all-buses
async fn get_all_buses(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let mut buses = Bus::list_all(&state.db.pool).await?;
    refresh_statuses(&state, &mut buses).await?;

    // Still-bookable buses first, each group by journey date
    buses.sort_by(|a, b| {
        let a_done = a.status == BusStatus::Completed;
        let b_done = b.status == BusStatus::Completed;
        a_done.cmp(&b_done).then(a.journey_date.cmp(&b.journey_date))
    });

    Ok(ApiResponse::ok("Buses fetched successfully", buses))
}

// GET /api/buses/{id}
async fn get_bus(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = path?;
    let bus = state
        .cache
        .get_bus(id)
        .await?
        .ok_or_else(|| AppError::not_found("Bus not found"))?;

    let mut buses = [bus];
    refresh_statuses(&state, &mut buses).await?;
    let [bus] = buses;

    Ok(ApiResponse::ok("Bus fetched successfully", bus))
}

// POST /api/buses/get?from=..&to=..&journeyDate=..
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteQuery {
    from: String,
    to: String,
    journey_date: NaiveDate,
}

async fn get_buses_by_route(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    query: Result<Query<RouteQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(params) = query?;

    let mut buses =
        Bus::find_by_route(&state.db.pool, &params.from, &params.to, params.journey_date).await?;
    refresh_statuses(&state, &mut buses).await?;
    buses.retain(listed_on_route);

    Ok(ApiResponse::ok("Buses fetched successfully", buses))
}

/// Completed journeys drop out of route search; running ones stay visible.
fn listed_on_route(bus: &Bus) -> bool {
    bus.status != BusStatus::Completed
}

// POST /api/buses/getETA
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtaRequest {
    bus_id: Uuid,
    stop_name: String,
}

async fn get_eta(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    payload: Result<Json<EtaRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;

    let bus = state
        .cache
        .get_bus(req.bus_id)
        .await?
        .ok_or_else(|| AppError::not_found("Bus not found"))?;

    let estimate = eta::estimate(&bus, &req.stop_name, local_now())?;
    Ok(ApiResponse::ok("Estimated time fetched successfully", estimate))
}

/* ---------- UPDATE / DELETE ---------- */

// PUT /api/buses/{id}
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateBusRequest {
    #[validate(length(min = 1))]
    name: Option<String>,
    #[validate(length(min = 1))]
    bus_number: Option<String>,
    #[validate(length(min = 1))]
    from: Option<String>,
    #[validate(length(min = 1))]
    to: Option<String>,
    departure: Option<String>,
    arrival: Option<String>,
    journey_date: Option<NaiveDate>,
    #[validate(range(min = 1, message = "capacity must be at least 1"))]
    capacity: Option<i32>,
    #[validate(range(min = 1))]
    rows: Option<i32>,
    #[validate(range(min = 1))]
    columns: Option<i32>,
    #[validate(range(min = 0.0, message = "price cannot be negative"))]
    price: Option<f64>,
    status: Option<BusStatus>,
    route_details: Option<Vec<RouteStop>>,
}

/// Folds an update into `bus`, enforcing the rules that need the current state.
fn apply_update(bus: &mut Bus, req: UpdateBusRequest) -> Result<(), AppError> {
    if let Some(capacity) = req.capacity {
        if let Some(highest) = bus.seats_booked.iter().max() {
            if capacity < *highest {
                return Err(AppError::validation(format!(
                    "Capacity cannot be lower than booked seat {highest}"
                )));
            }
        }
        bus.capacity = capacity;
    }
    if let Some(status) = req.status {
        schedule::check_transition(bus.status, status)?;
        bus.status = status;
    }

    if let Some(name) = req.name {
        bus.name = name;
    }
    if let Some(bus_number) = req.bus_number {
        bus.bus_number = bus_number;
    }
    if let Some(from) = req.from {
        bus.from_city = from;
    }
    if let Some(to) = req.to {
        bus.to_city = to;
    }
    if let Some(departure) = req.departure {
        bus.departure = departure;
    }
    if let Some(arrival) = req.arrival {
        bus.arrival = arrival;
    }
    if let Some(journey_date) = req.journey_date {
        bus.journey_date = journey_date;
    }
    if let Some(rows) = req.rows {
        bus.rows = rows;
    }
    if let Some(columns) = req.columns {
        bus.columns = columns;
    }
    if let Some(price) = req.price {
        bus.price = price;
    }
    if let Some(route_details) = req.route_details {
        bus.route_details = route_details;
    }

    check_schedule(&bus.departure, &bus.arrival, &bus.route_details)?;
    bus.recompute_occupancy();
    Ok(())
}

async fn update_bus(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateBusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = path?;
    let Json(req) = payload?;
    req.validate()?;

    let mut tx = state.db.pool.begin().await?;
    let mut bus = Bus::find_for_update(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::not_found("Bus not found"))?;

    bus.refresh_status(local_now());
    if bus.status == BusStatus::Completed {
        return Err(AppError::validation("You can't update a completed bus"));
    }

    apply_update(&mut bus, req)?;
    bus.save_details(&mut *tx).await.map_err(unique_number)?;
    tx.commit().await?;

    state.cache.invalidate_bus(id).await;
    tracing::info!(bus_id = %id, "bus updated");
    Ok(ApiResponse::ok("Bus updated successfully", bus))
}

// DELETE /api/buses/{id}
async fn delete_bus(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = path?;

    if !Bus::delete(&state.db.pool, id).await? {
        return Err(AppError::not_found("Bus not found"));
    }
    state.cache.invalidate_bus(id).await;

    tracing::info!(bus_id = %id, "bus deleted");
    Ok(ApiResponse::message("Bus deleted successfully"))
}
