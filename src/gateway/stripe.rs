use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, instrument};

use super::{CheckoutRequest, CheckoutSession, PaymentGateway, SessionStatus};
use crate::errors::ServiceError;

/// Stripe-compatible checkout client.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: Option<String>,
    url: Option<String>,
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::GatewayTimeout
    } else {
        ServiceError::GatewayError(err.to_string())
    }
}

/// Flattens a checkout request into Stripe's bracketed form encoding.
pub(crate) fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        (
            "expires_at".to_string(),
            request.expires_at.timestamp().to_string(),
        ),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        form.push((
            format!("{}[price_data][currency]", prefix),
            request.currency.clone(),
        ));
        form.push((
            format!("{}[price_data][unit_amount]", prefix),
            item.unit_amount.to_string(),
        ));
        form.push((
            format!("{}[price_data][product_data][name]", prefix),
            item.name.clone(),
        ));
        form.push((
            format!("{}[price_data][product_data][description]", prefix),
            item.description.clone(),
        ));
        form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{}]", key), value.clone()));
        form.push((
            format!("payment_intent_data[metadata][{}]", key),
            value.clone(),
        ));
    }

    form
}

impl StripeGateway {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    async fn read_error(response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(%status, body = %body, "payment gateway returned an error");
        if status == StatusCode::GATEWAY_TIMEOUT || status == StatusCode::REQUEST_TIMEOUT {
            ServiceError::GatewayTimeout
        } else {
            ServiceError::GatewayError(format!("gateway responded with {}", status))
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(items = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&checkout_form(&request))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let created: CreatedSession = response.json().await.map_err(transport_error)?;
        match (created.id, created.url) {
            (Some(id), Some(url)) => {
                info!(session_id = %id, "checkout session created");
                Ok(CheckoutSession { id, url })
            }
            _ => Err(ServiceError::GatewayError(
                "checkout session response is missing id or url".to_string(),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, ServiceError> {
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ServiceError::InvalidInput(format!(
                "unknown checkout session {}",
                session_id
            )));
        }
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        response.json().await.map_err(transport_error)
    }

    #[instrument(skip(self))]
    async fn expire_session(&self, session_id: &str) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/checkout/sessions/{}/expire",
                self.api_base, session_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        info!(%session_id, "checkout session expired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CheckoutState, PaymentStatus};
    use crate::services::basket::LineItem;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CheckoutRequest {
        let mut metadata = BTreeMap::new();
        metadata.insert("contribution_id".to_string(), "c-1".to_string());
        CheckoutRequest {
            line_items: vec![LineItem {
                key: "wreath:gold".into(),
                name: "Memorial Donation".into(),
                description: "Donation wreath for memorial".into(),
                unit_amount: 10_000,
                quantity: 1,
            }],
            currency: "usd".into(),
            success_url: "https://example.test/ok".into(),
            cancel_url: "https://example.test/cancel".into(),
            metadata,
            expires_at: chrono::DateTime::from_timestamp(1_700_001_800, 0).unwrap(),
        }
    }

    #[test]
    fn form_mirrors_metadata_into_payment_intent() {
        let form = checkout_form(&request());
        assert!(form.contains(&("expires_at".to_string(), "1700001800".to_string())));
        assert!(form.contains(&(
            "line_items[0][price_data][unit_amount]".to_string(),
            "10000".to_string()
        )));
        assert!(form.contains(&("metadata[contribution_id]".to_string(), "c-1".to_string())));
        assert!(form.contains(&(
            "payment_intent_data[metadata][contribution_id]".to_string(),
            "c-1".to_string()
        )));
    }

    #[tokio::test]
    async fn creates_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test"))
            .and(body_string_contains("mode=payment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_123",
                "url": "https://pay.example/cs_123"
            })))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new(server.uri(), "sk_test", Duration::from_secs(5)).unwrap();
        let session = gateway.create_checkout_session(request()).await.unwrap();
        assert_eq!(session.id, "cs_123");
        assert_eq!(session.url, "https://pay.example/cs_123");
    }

    #[tokio::test]
    async fn missing_url_is_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "cs_1" })),
            )
            .mount(&server)
            .await;

        let gateway = StripeGateway::new(server.uri(), "sk_test", Duration::from_secs(5)).unwrap();
        assert_matches!(
            gateway.create_checkout_session(request()).await,
            Err(ServiceError::GatewayError(_))
        );
    }

    #[tokio::test]
    async fn server_error_maps_to_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new(server.uri(), "sk_test", Duration::from_secs(5)).unwrap();
        assert_matches!(
            gateway.create_checkout_session(request()).await,
            Err(ServiceError::GatewayError(_))
        );
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let gateway =
            StripeGateway::new(server.uri(), "sk_test", Duration::from_millis(50)).unwrap();
        assert_matches!(
            gateway.retrieve_session("cs_1").await,
            Err(ServiceError::GatewayTimeout)
        );
    }

    #[tokio::test]
    async fn retrieves_session_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_9",
                "object": "checkout.session",
                "payment_status": "paid",
                "amount_total": 10000,
                "metadata": { "contribution_id": "c-1" }
            })))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new(server.uri(), "sk_test", Duration::from_secs(5)).unwrap();
        let status = gateway.retrieve_session("cs_9").await.unwrap();
        assert_eq!(status.payment_status, PaymentStatus::Paid);
        assert!(status.is_paid());
        assert_eq!(status.amount_total, Some(10_000));
        assert_eq!(status.metadata_value("contribution_id"), Some("c-1"));
        assert_eq!(status.status, CheckoutState::Unknown);
    }

    #[tokio::test]
    async fn expires_open_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions/cs_7/expire"))
            .and(header("authorization", "Bearer sk_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_7",
                "status": "expired"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = StripeGateway::new(server.uri(), "sk_test", Duration::from_secs(5)).unwrap();
        gateway.expire_session("cs_7").await.unwrap();
    }

    #[tokio::test]
    async fn completed_session_cannot_be_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions/cs_8/expire"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Only Checkout Sessions with a status of open can be expired." }
            })))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new(server.uri(), "sk_test", Duration::from_secs(5)).unwrap();
        assert_matches!(
            gateway.expire_session("cs_8").await,
            Err(ServiceError::GatewayError(_))
        );
    }
}
