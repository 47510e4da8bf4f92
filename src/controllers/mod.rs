pub mod auth;
pub mod bookings;
pub mod buses;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .nest("/auth", auth::routes())
        .nest("/buses", buses::routes())
        .nest("/bookings", bookings::routes())
}
