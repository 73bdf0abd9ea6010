use axum::extract::{Path, Query, State};
use axum::Json;

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::models::ContributionView;
use crate::services::feed::FeedQuery;
use crate::services::pagination::Page;
use crate::{ApiResponse, ApiResult, AppState};

/// GET /api/v1/memorials/:memorial/contributions
pub async fn list_memorial_contributions(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<FeedQuery>,
    viewer: MaybeAuthUser,
) -> ApiResult<Page<ContributionView>> {
    let page = state
        .services
        .feeds
        .list_published(&slug, &query, viewer.user_id())
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /api/v1/me/contributions
pub async fn list_my_contributions(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    user: AuthUser,
) -> ApiResult<Page<ContributionView>> {
    let page = state.services.feeds.list_owned(user.user_id, &query).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /api/v1/me/liked
pub async fn list_liked_contributions(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    user: AuthUser,
) -> ApiResult<Page<ContributionView>> {
    let page = state.services.feeds.list_liked(user.user_id, &query).await?;
    Ok(Json(ApiResponse::success(page)))
}
