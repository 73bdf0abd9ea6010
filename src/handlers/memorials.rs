use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::entities::memorial;
use crate::errors::ServiceError;
use crate::services::memorials::CreateMemorialRequest;
use crate::{ApiResponse, ApiResult, AppState};

/// POST /api/v1/memorials
pub async fn create_memorial(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateMemorialRequest>,
) -> Result<(StatusCode, Json<ApiResponse<memorial::Model>>), ServiceError> {
    let created = state
        .services
        .memorials
        .create(user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// GET /api/v1/memorials/:memorial
///
/// Drafts and removed memorials are only visible to their owner.
pub async fn get_memorial(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    viewer: MaybeAuthUser,
) -> ApiResult<memorial::Model> {
    let found = state.services.memorials.get_by_slug(&slug).await?;
    if !found.is_published() && viewer.user_id() != Some(found.owner_id) {
        return Err(ServiceError::NotFound(format!(
            "Memorial '{}' not found",
            slug
        )));
    }
    Ok(Json(ApiResponse::success(found)))
}

/// POST /api/v1/memorials/:memorial/publish
pub async fn publish_memorial(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> ApiResult<memorial::Model> {
    let published = state
        .services
        .memorials
        .publish(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(published)))
}
