//! Tribute API Library
//!
//! Memorial contributions: drafting, paid or free publishing, payment
//! reconciliation, moderation flags, likes and cursor-paginated feeds.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod notifications;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{
    extract::{FromRef, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::auth::AuthService;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    use handlers::{
        contributions, feeds, flags, memorials, notifications, payment_webhooks, prices,
    };

    let memorial_routes = Router::new()
        .route("/memorials", post(memorials::create_memorial))
        .route("/memorials/:memorial", get(memorials::get_memorial))
        .route(
            "/memorials/:memorial/publish",
            post(memorials::publish_memorial),
        )
        .route(
            "/memorials/:memorial/contributions",
            post(contributions::create_contribution).get(feeds::list_memorial_contributions),
        )
        .route("/memorials/:memorial/flags", get(flags::list_memorial_flags));

    let contribution_routes = Router::new()
        .route(
            "/contributions/:id",
            get(contributions::get_contribution)
                .patch(contributions::update_contribution)
                .delete(contributions::delete_contribution),
        )
        .route(
            "/contributions/:id/preview",
            post(contributions::preview_contribution),
        )
        .route(
            "/contributions/:id/publish",
            post(contributions::publish_contribution),
        )
        .route(
            "/contributions/:id/validate-purchase",
            post(contributions::validate_purchase),
        )
        .route(
            "/contributions/:id/like",
            post(contributions::like_contribution).delete(contributions::unlike_contribution),
        );

    let me_routes = Router::new()
        .route("/me/contributions", get(feeds::list_my_contributions))
        .route("/me/liked", get(feeds::list_liked_contributions));

    let moderation_routes = Router::new()
        .route("/flags", post(flags::create_flag))
        .route("/flags/:id", axum::routing::patch(flags::resolve_flag))
        .route("/admin/flags", get(flags::list_open_reports));

    let admin_routes = Router::new()
        .route("/admin/prices", get(prices::list_prices))
        .route("/admin/prices/:key", put(prices::set_price));

    let notification_routes = Router::new()
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/:id/read",
            post(notifications::mark_notification_read),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .route("/payments/webhook", post(payment_webhooks::payment_webhook))
        .merge(memorial_routes)
        .merge(contribution_routes)
        .merge(me_routes)
        .merge(moderation_routes)
        .merge(admin_routes)
        .merge(notification_routes)
}

/// CORS policy from configuration. Fails when neither explicit origins nor
/// a permissive override is configured.
pub fn cors_layer(cfg: &config::AppConfig) -> Result<CorsLayer, errors::ServiceError> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(cfg.cors_allow_credentials))
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!("Using permissive CORS because explicit origins were not configured");
        Ok(CorsLayer::permissive())
    } else {
        Err(errors::ServiceError::InternalError(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
                .to_string(),
        ))
    }
}

/// Full application router with the standard middleware stack.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::<AppState>::new()
        .route("/", get(|| async { "tribute-api up" }))
        .nest("/api/v1", api_v1_routes())
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(cors)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "tribute-api",
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "database ping failed");
            "unhealthy"
        }
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
