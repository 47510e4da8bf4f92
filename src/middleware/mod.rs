use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{config::AuthConfig, error::AppError, models::User};

pub const AUTH_COOKIE: &str = "authToken";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub is_admin: bool,
    pub exp: usize,
}

/// Caller identity taken from a verified token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub is_admin: bool,
}

/// An [`AuthUser`] whose token carries the admin flag.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl AuthUser {
    /// Acting on another user's records needs admin rights.
    pub fn ensure_can_act_for(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.user_id == user_id || self.is_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You can only access your own bookings".to_string(),
            ))
        }
    }
}

pub fn issue_token(config: &AuthConfig, user: &User) -> Result<String, AppError> {
    let expires = Utc::now() + Duration::hours(config.token_ttl_hours);
    let claims = Claims {
        user_id: user.id,
        is_admin: user.is_admin,
        exp: expires.timestamp().max(0) as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Authentication failed".to_string()))
}

/// `Set-Cookie` value for a freshly issued token.
pub fn auth_cookie(token: &str, ttl_hours: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{AUTH_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        ttl_hours * 3600
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// The token from the `authToken` cookie, falling back to a bearer header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
    })
}

impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers).ok_or_else(|| {
            AppError::Unauthorized("Authentication failed, token not provided".to_string())
        })?;

        let claims = verify_token(&state.config.auth.jwt_secret, &token)?;

        Ok(AuthUser {
            user_id: claims.user_id,
            is_admin: claims.is_admin,
        })
    }
}

impl FromRequestParts<Arc<crate::AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AppError::Forbidden(
                "Unauthorized access, admin privileges required".to_string(),
            ));
        }
        Ok(AdminUser(user))
    }
}
