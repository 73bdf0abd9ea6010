use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::notification;
use crate::{ApiResponse, ApiResult, AppState};

/// GET /api/v1/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<notification::Model>> {
    let inbox = state.services.notifications.list(user.user_id).await?;
    Ok(Json(ApiResponse::success(inbox)))
}

/// POST /api/v1/notifications/:id/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> ApiResult<notification::Model> {
    let read = state
        .services
        .notifications
        .mark_read(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(read)))
}
