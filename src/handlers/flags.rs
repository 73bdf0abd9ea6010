use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::memorial_flag::{self, FlagReason, FlagType};
use crate::errors::ServiceError;
use crate::services::flags::FlagDecision;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateFlagRequest {
    pub flag_type: String,
    pub reference_id: Uuid,
    pub reason: Option<FlagReason>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveFlagRequest {
    pub status: FlagDecision,
}

#[derive(Debug, Serialize)]
pub struct CreateFlagResponse {
    /// False when an identical open flag already existed.
    pub created: bool,
    pub flag: Option<memorial_flag::Model>,
}

/// POST /api/v1/flags
pub async fn create_flag(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateFlagRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateFlagResponse>>), ServiceError> {
    let flag_type = FlagType::from_str(&payload.flag_type)
        .map_err(|_| ServiceError::ValidationError("Invalid flag type".to_string()))?;
    let flag = state
        .services
        .flags
        .create_flag(user.user_id, flag_type, payload.reference_id, payload.reason)
        .await?;

    let status = if flag.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ApiResponse::success(CreateFlagResponse {
            created: flag.is_some(),
            flag,
        })),
    ))
}

/// PATCH /api/v1/flags/:id
pub async fn resolve_flag(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
    Json(payload): Json<ResolveFlagRequest>,
) -> ApiResult<memorial_flag::Model> {
    let resolved = state
        .services
        .flags
        .resolve_flag(user.user_id, user.is_admin(), id, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(resolved)))
}

/// GET /api/v1/memorials/:memorial/flags
pub async fn list_memorial_flags(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    user: AuthUser,
) -> ApiResult<Vec<memorial_flag::Model>> {
    let flags = state
        .services
        .flags
        .list_open_for_owner(user.user_id, &slug)
        .await?;
    Ok(Json(ApiResponse::success(flags)))
}

/// GET /api/v1/admin/flags
pub async fn list_open_reports(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<memorial_flag::Model>> {
    let flags = state
        .services
        .flags
        .list_open_reports(user.is_admin())
        .await?;
    Ok(Json(ApiResponse::success(flags)))
}
