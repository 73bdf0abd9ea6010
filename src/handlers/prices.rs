use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::entities::price_entry;
use crate::errors::ServiceError;
use crate::models::Price;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SetPriceRequest {
    pub price: Price,
}

fn require_admin(user: &AuthUser) -> Result<(), ServiceError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden("Admin access required".to_string()))
    }
}

/// GET /api/v1/admin/prices
pub async fn list_prices(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<price_entry::Model>> {
    require_admin(&user)?;
    let prices = state.services.prices.list().await?;
    Ok(Json(ApiResponse::success(prices)))
}

/// PUT /api/v1/admin/prices/:key
pub async fn set_price(
    State(state): State<AppState>,
    Path(key): Path<String>,
    user: AuthUser,
    Json(payload): Json<SetPriceRequest>,
) -> ApiResult<price_entry::Model> {
    require_admin(&user)?;
    let entry = state.services.prices.set_price(&key, payload.price).await?;
    Ok(Json(ApiResponse::success(entry)))
}
