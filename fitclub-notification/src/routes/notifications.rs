use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use fitclub_shared::errors::AppResult;
use fitclub_shared::middleware::{require_tenant, StaffUser};
use fitclub_shared::types::{
    ApiResponse, AuthUser, BatchOutcome, CountResponse, NotificationAction, NotificationRecord,
    NotificationType,
};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateNotificationRequest {
    pub tenant_id: Uuid,
    #[serde(rename = "type", default)]
    pub notification_type: NotificationType,
    #[validate(length(min = 1, max = 255, message = "title must be 1-255 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 2000, message = "message must be 1-2000 characters"))]
    pub message: String,
    #[serde(default)]
    pub action: NotificationAction,
}

/// Per-id mutations are only allowed inside the caller's tenants. Unknown ids
/// fall through so the service can treat them as already applied.
async fn guard_notification(state: &AppState, user: &AuthUser, notification_id: Uuid) -> AppResult<()> {
    match state.notifications.tenant_of(notification_id).await? {
        Some(tenant_id) => require_tenant(user, tenant_id),
        None => Ok(()),
    }
}

/// GET /notifications?tenant_id=
/// Visible notifications for the caller in one tenant, newest first.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<TenantQuery>,
) -> AppResult<Json<ApiResponse<Vec<NotificationRecord>>>> {
    require_tenant(&auth_user, query.tenant_id)?;
    let items = state.notifications.list(query.tenant_id, auth_user.id).await?;
    Ok(Json(ApiResponse::ok(items)))
}

/// GET /notifications/unread-count?tenant_id=
pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<TenantQuery>,
) -> AppResult<Json<ApiResponse<CountResponse>>> {
    require_tenant(&auth_user, query.tenant_id)?;
    let count = state.notifications.unread_count(query.tenant_id, auth_user.id).await?;
    Ok(Json(ApiResponse::ok(CountResponse { count })))
}

/// POST /notifications
/// Staff-only tenant broadcast.
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    Json(req): Json<CreateNotificationRequest>,
) -> AppResult<Json<ApiResponse<NotificationRecord>>> {
    req.validate().map_err(super::invalid_body)?;
    require_tenant(&staff, req.tenant_id)?;

    let record = state
        .notifications
        .create(req.tenant_id, req.notification_type, &req.title, &req.message, req.action)
        .await?;

    tracing::info!(staff_id = %staff.id, notification_id = %record.id, "broadcast created via api");
    Ok(Json(ApiResponse::ok(record)))
}

/// POST /notifications/:id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    guard_notification(&state, &auth_user, id).await?;
    state.notifications.mark_read(id, auth_user.id).await?;
    Ok(Json(ApiResponse::ok_with_message((), "notification marked as read")))
}

/// POST /notifications/mark-all-read?tenant_id=
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<TenantQuery>,
) -> AppResult<Json<ApiResponse<BatchOutcome>>> {
    require_tenant(&auth_user, query.tenant_id)?;
    let outcome = state.notifications.mark_all_read(query.tenant_id, auth_user.id).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// DELETE /notifications/:id
/// Dismisses the notification for the caller only.
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    guard_notification(&state, &auth_user, id).await?;
    state.notifications.delete(id, auth_user.id).await?;
    Ok(Json(ApiResponse::ok_with_message((), "notification cleared")))
}

/// DELETE /notifications?tenant_id=
pub async fn delete_all(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<TenantQuery>,
) -> AppResult<Json<ApiResponse<BatchOutcome>>> {
    require_tenant(&auth_user, query.tenant_id)?;
    let outcome = state.notifications.delete_all(query.tenant_id, auth_user.id).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}
