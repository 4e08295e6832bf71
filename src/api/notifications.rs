//! Notifications API
//!
//! Public:
//!
//! - GET  /api/notifications/online-count         - Current online session count
//!
//! Admin (bearer token with the admin role):
//!
//! - GET  /api/admin/notifications                - List notifications (paginated)
//! - GET  /api/admin/notifications/unread-count   - Unread notification count
//! - PUT  /api/admin/notifications/:id/read       - Mark one notification read
//! - PUT  /api/admin/notifications/read-all       - Mark all notifications read
//! - POST /api/admin/notifications/broadcast      - Publish a system announcement
//! - GET  /api/admin/notifications/ws-stats       - Broker statistics

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use tracing::info;

use super::auth::AdminAuth;
use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::services::notifications::DEFAULT_BROADCAST_TITLE;
use crate::types::{
    BroadcastRequest, MarkReadResponse, NotificationEvent, NotificationPage, NotificationQuery,
    PresenceSnapshot, UnreadCount, WsStats,
};
use crate::AppState;

// =============================================================================
// Routers
// =============================================================================

/// Public notification routes.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/online-count", get(online_count))
}

/// Admin notification routes.
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/:id/read", put(mark_read))
        .route("/read-all", put(mark_all_read))
        .route("/broadcast", post(broadcast))
        .route("/ws-stats", get(ws_stats))
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/notifications/online-count
async fn online_count(State(state): State<AppState>) -> Json<ApiResponse<PresenceSnapshot>> {
    Json(ApiResponse {
        data: PresenceSnapshot::new(state.broker.online_count() as u32),
    })
}

/// GET /api/admin/notifications
async fn list_notifications(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> Json<ApiResponse<NotificationPage>> {
    let page = query.page.unwrap_or(0);
    let size = query.size.unwrap_or(20);
    Json(ApiResponse {
        data: state.notifications.list(page, size),
    })
}

/// GET /api/admin/notifications/unread-count
async fn unread_count(
    _auth: AdminAuth,
    State(state): State<AppState>,
) -> Json<ApiResponse<UnreadCount>> {
    Json(ApiResponse {
        data: UnreadCount {
            unread_count: state.notifications.unread_count() as u64,
        },
    })
}

/// PUT /api/admin/notifications/:id/read
async fn mark_read(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<MarkReadResponse>>> {
    let affected = state.notifications.mark_read(id)?;
    Ok(Json(ApiResponse {
        data: MarkReadResponse {
            success: true,
            affected,
        },
    }))
}

/// PUT /api/admin/notifications/read-all
async fn mark_all_read(
    _auth: AdminAuth,
    State(state): State<AppState>,
) -> Json<ApiResponse<MarkReadResponse>> {
    let affected = state.notifications.mark_all_read();
    Json(ApiResponse {
        data: MarkReadResponse {
            success: true,
            affected,
        },
    })
}

/// POST /api/admin/notifications/broadcast
///
/// Publish a SYSTEM notification to every connected client. The sender is the
/// token subject.
async fn broadcast(
    auth: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<ApiResponse<NotificationEvent>>> {
    let content = request
        .content
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("content must not be blank".to_string()))?;

    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_BROADCAST_TITLE);

    info!("Admin {} broadcasting \"{}\"", auth.principal.subject, title);
    let event = state
        .notifications
        .broadcast_system(title, content, &auth.principal.subject);

    Ok(Json(ApiResponse { data: event }))
}

/// GET /api/admin/notifications/ws-stats
async fn ws_stats(_auth: AdminAuth, State(state): State<AppState>) -> Json<ApiResponse<WsStats>> {
    Json(ApiResponse {
        data: state.notifications.stats(),
    })
}
