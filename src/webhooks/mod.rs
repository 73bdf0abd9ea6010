//! Signed payment webhooks: signature checks and event decoding.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer over `"{timestamp}.{body}"`.
pub struct SignatureGenerator {
    secret: String,
}

impl SignatureGenerator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Hex signature of the payload, `None` if the key is unusable.
    pub fn sign_payload(&self, timestamp: &str, body: &[u8]) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Extracts `(timestamp, signature)` from either the generic
/// `x-timestamp`/`x-signature` pair or a `Stripe-Signature: t=..,v1=..` header.
fn signature_parts(headers: &HeaderMap) -> Option<(String, String)> {
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            return Some((ts.to_string(), sig.to_string()));
        }
    }

    let header = headers.get("Stripe-Signature")?.to_str().ok()?;
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", val)) => ts = Some(val.to_string()),
            Some(("v1", val)) if v1.is_none() => v1 = Some(val.to_string()),
            _ => {}
        }
    }
    Some((ts?, v1?))
}

pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let Some((ts, sig)) = signature_parts(headers) else {
        return false;
    };
    let Ok(ts_i) = ts.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts_i).unsigned_abs() > tolerance_secs {
        return false;
    }
    match SignatureGenerator::new(secret).sign_payload(&ts, payload) {
        Some(expected) => constant_time_eq(&expected, &sig),
        None => false,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<RawEventData>,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: RawObject,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Payment events the service acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    /// A checkout session reports payment; the object id is the session id.
    SessionPaid {
        event_id: Option<String>,
        session_id: String,
        contribution_id: Option<Uuid>,
    },
    /// A payment intent succeeded; the session is looked up from the contribution.
    PaymentIntentSucceeded {
        event_id: Option<String>,
        payment_intent_id: String,
        contribution_id: Option<Uuid>,
    },
    Ignored {
        event_type: String,
    },
}

fn contribution_ref(metadata: &HashMap<String, String>) -> Option<Uuid> {
    metadata
        .get("contribution_id")
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

pub fn parse_event(payload: &[u8]) -> Result<PaymentEvent, ServiceError> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid json: {}", e)))?;

    let object = match (raw.event_type.as_str(), raw.data) {
        (
            "checkout.session.completed"
            | "checkout.session.async_payment_succeeded"
            | "payment_intent.succeeded",
            Some(data),
        ) => data.object,
        (
            "checkout.session.completed"
            | "checkout.session.async_payment_succeeded"
            | "payment_intent.succeeded",
            None,
        ) => {
            return Err(ServiceError::InvalidInput(
                "event carries no data object".to_string(),
            ))
        }
        _ => {
            return Ok(PaymentEvent::Ignored {
                event_type: raw.event_type,
            })
        }
    };

    let contribution_id = contribution_ref(&object.metadata);
    if raw.event_type == "payment_intent.succeeded" {
        Ok(PaymentEvent::PaymentIntentSucceeded {
            event_id: raw.id,
            payment_intent_id: object.id,
            contribution_id,
        })
    } else {
        Ok(PaymentEvent::SessionPaid {
            event_id: raw.id,
            session_id: object.id,
            contribution_id,
        })
    }
}
