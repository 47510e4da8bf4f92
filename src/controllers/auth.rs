use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    middleware::{auth_cookie, issue_token},
    models::{User, UserSummary},
    response::ApiResponse,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

// POST /api/auth/register
#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(length(min = 1, message = "name is required"))]
    name: String,
    #[validate(email(message = "email is invalid"))]
    email: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    req.validate()?;

    if User::find_by_email(&state.db.pool, &req.email).await?.is_some() {
        return Err(AppError::conflict("User already exists"));
    }

    let cost = state.config.auth.bcrypt_cost;
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))??;

    let email = req.email.trim().to_ascii_lowercase();
    let user = User {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        is_admin: state.config.auth.is_admin_email(&email),
        email,
        password_hash,
        created_at: Utc::now(),
    };

    user.insert(&state.db.pool).await.map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("User already exists")
        }
        other => AppError::Database(other),
    })?;

    tracing::info!(user_id = %user.id, admin = user.is_admin, "user registered");
    Ok(ApiResponse::message("User created successfully"))
}

// POST /api/auth/login
#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;

    let user = User::find_by_email(&state.db.pool, &req.email)
        .await?
        .ok_or_else(|| AppError::validation("User does not exist"))?;

    let hash = user.password_hash.clone();
    let password = req.password;
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))??;
    if !matches {
        return Err(AppError::validation("Incorrect password"));
    }

    let token = issue_token(&state.config.auth, &user)?;
    let cookie = auth_cookie(
        &token,
        state.config.auth.token_ttl_hours,
        state.config.app.is_production(),
    );

    tracing::info!(user_id = %user.id, "user logged in");
    Ok((
        [(header::SET_COOKIE, cookie)],
        ApiResponse::ok("User logged in successfully", UserSummary::from(&user)),
    ))
}
