use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use tracing::{error, info, warn};

use crate::errors::ServiceError;
use crate::services::lifecycle::WebhookOutcome;
use crate::webhooks::{parse_event, verify_signature};
use crate::AppState;

// POST /api/v1/payments/webhook
//
// 200 tells the gateway to stop retrying, so it is returned for anything
// already handled or not actionable. Retryable failures during
// reconciliation answer 503 to get the event redelivered.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    counter!("tribute.webhook.received", 1);

    match state.config.payment_webhook_secret.as_deref() {
        Some(secret) => {
            let ok = verify_signature(
                &headers,
                &body,
                secret,
                state.config.payment_webhook_tolerance_secs,
            );
            if !ok {
                warn!("Payment webhook signature verification failed");
                return Err(ServiceError::Unauthorized(
                    "invalid webhook signature".to_string(),
                ));
            }
        }
        None if state.config.is_development() => {
            warn!("Payment webhook secret not configured; accepting unsigned event");
        }
        None => {
            error!("Payment webhook secret not configured");
            return Err(ServiceError::Unauthorized(
                "webhook signing is not configured".to_string(),
            ));
        }
    }

    let event = parse_event(&body)?;
    match state.services.contributions.handle_payment_event(event).await {
        Ok(WebhookOutcome::Reconciled(result)) => {
            info!(?result, "payment webhook reconciled");
            Ok((StatusCode::OK, "ok").into_response())
        }
        Ok(WebhookOutcome::Ignored) => Ok((StatusCode::OK, "ok").into_response()),
        Err(e) if e.is_retryable() => {
            warn!(error = %e, "webhook handling failed, asking for redelivery");
            Ok((StatusCode::SERVICE_UNAVAILABLE, "retry").into_response())
        }
        Err(e) => Err(e),
    }
}
