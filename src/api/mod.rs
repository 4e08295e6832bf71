pub mod auth;
pub mod health;
pub mod notifications;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/notifications", notifications::public_router())
        .nest("/api/admin/notifications", notifications::admin_router())
}
