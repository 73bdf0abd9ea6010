use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::errors::ServiceError;
use crate::models::{ContributionPatch, ContributionView, CreateContributionRequest};
use crate::services::lifecycle::{PublishOutcome, PurchaseValidation};
use crate::services::likes::LikeState;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct ValidatePurchaseRequest {
    #[validate(length(min = 1, max = 255, message = "session_id is required"))]
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: Uuid,
}

/// POST /api/v1/memorials/:memorial/contributions
pub async fn create_contribution(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    user: AuthUser,
    Json(payload): Json<CreateContributionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ContributionView>>), ServiceError> {
    let created = state
        .services
        .contributions
        .create(user.user_id, &slug, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// GET /api/v1/contributions/:id
pub async fn get_contribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    viewer: MaybeAuthUser,
) -> ApiResult<ContributionView> {
    let view = state
        .services
        .contributions
        .get(id, viewer.user_id())
        .await?;
    Ok(Json(ApiResponse::success(view)))
}

/// PATCH /api/v1/contributions/:id
pub async fn update_contribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
    Json(patch): Json<ContributionPatch>,
) -> ApiResult<ContributionView> {
    let updated = state
        .services
        .contributions
        .update(user.user_id, id, patch)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

/// DELETE /api/v1/contributions/:id
pub async fn delete_contribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> ApiResult<DeletedResponse> {
    state
        .services
        .contributions
        .delete(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(DeletedResponse { id })))
}

/// POST /api/v1/contributions/:id/preview
pub async fn preview_contribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
    Json(overrides): Json<ContributionPatch>,
) -> ApiResult<ContributionView> {
    let preview = state
        .services
        .contributions
        .preview(user.user_id, id, overrides)
        .await?;
    Ok(Json(ApiResponse::success(preview)))
}

/// POST /api/v1/contributions/:id/publish
pub async fn publish_contribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> ApiResult<PublishOutcome> {
    let outcome = state
        .services
        .contributions
        .publish(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// POST /api/v1/contributions/:id/validate-purchase
pub async fn validate_purchase(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
    Json(payload): Json<ValidatePurchaseRequest>,
) -> ApiResult<PurchaseValidation> {
    payload.validate()?;
    let result = state
        .services
        .contributions
        .validate_purchase(id, &payload.session_id)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// POST /api/v1/contributions/:id/like
pub async fn like_contribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> ApiResult<LikeState> {
    let like = state.services.likes.like(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(like)))
}

/// DELETE /api/v1/contributions/:id/like
pub async fn unlike_contribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> ApiResult<LikeState> {
    let like = state.services.likes.unlike(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(like)))
}
