use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Contribution {0} is already published")]
    AlreadyPublished(Uuid),

    #[error("Contribution {0} is under review")]
    UnderReview(Uuid),

    #[error("Flag {0} has already been handled")]
    AlreadyHandled(Uuid),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid cursor")]
    InvalidCursor,

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Invalid price configuration: {0}")]
    InvalidPriceConfiguration(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Payment gateway timed out")]
    GatewayTimeout,

    #[error("Concurrent modification: {0}")]
    PersistenceConflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::InternalError(format!("serialization failed: {}", err))
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ValidationError(_)
            | Self::InvalidInput(_)
            | Self::InvalidCursor
            | Self::InvalidReference(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyPublished(_)
            | Self::UnderReview(_)
            | Self::AlreadyHandled(_)
            | Self::InvalidState(_)
            | Self::PersistenceConflict(_) => StatusCode::CONFLICT,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidPriceConfiguration(_)
            | Self::DatabaseError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::GatewayError(_) => "Payment provider unavailable, please retry".to_string(),
            _ => self.to_string(),
        }
    }

    /// Publish or resolution attempted from a state that does not allow it.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            Self::AlreadyPublished(_)
                | Self::UnderReview(_)
                | Self::AlreadyHandled(_)
                | Self::InvalidState(_)
        )
    }

    /// The caller should retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayError(_) | Self::GatewayTimeout | Self::PersistenceConflict(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
