//! Stripe checkout webhooks.
//!
//! Stripe signs every delivery with HMAC-SHA256 under the endpoint secret and
//! sends the result in the `Stripe-Signature` header:
//! `t=<unix timestamp>,v1=<hex signature>[,v1=...]`
//!
//! The signed message is `"{t}.{raw body}"`. A delivery is accepted when any
//! `v1` entry matches and `t` is within [`TOLERANCE_SECS`] of now.
//!
//! The signature MUST be computed over the raw request bytes, not re-encoded
//! JSON.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::{PaymentEvent, ProviderStatus};
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

fn signature_error(reason: &str) -> AppError {
    tracing::warn!(reason, "Webhook signature verification failed");
    AppError::Unauthorized("Invalid webhook signature".to_string())
}

fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> AppResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Failed to create HMAC instance: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    Ok(mac.finalize().into_bytes().to_vec())
}

/// Checks the `Stripe-Signature` header against the raw payload.
pub fn verify_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| signature_error("missing timestamp"))?;
    let issued: i64 = timestamp
        .parse()
        .map_err(|_| signature_error("unparsable timestamp"))?;

    if (now.timestamp() - issued).abs() > TOLERANCE_SECS {
        return Err(signature_error("timestamp outside tolerance"));
    }

    if signatures.is_empty() {
        return Err(signature_error("no v1 signature"));
    }

    let computed = sign(secret, timestamp, payload)?;

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|expected| bool::from(computed.ct_eq(&expected[..])))
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(signature_error("signatures do not match"))
    }
}

fn provider_status(event_type: &str, payment_status: &str) -> ProviderStatus {
    match (event_type, payment_status) {
        ("checkout.session.expired", _) => ProviderStatus::Expired,
        ("checkout.session.async_payment_failed", _) => ProviderStatus::Failed,
        (_, "paid" | "no_payment_required") => ProviderStatus::Paid,
        (_, "failed") => ProviderStatus::Failed,
        _ => ProviderStatus::Other,
    }
}

/// Projects a verified payload onto a [`PaymentEvent`]. A payload without
/// `payment_status` or without `metadata.pay_id` is a provider
/// misconfiguration and is rejected as a bad request.
pub fn parse_event(payload: &[u8]) -> AppResult<PaymentEvent> {
    let event: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| AppError::BadRequest(format!("Malformed webhook payload: {}", e)))?;
    let object = &event.data.object;

    let payment_status = object
        .get("payment_status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadRequest("Webhook payload has no payment_status".to_string()))?;

    let pay_id = object
        .pointer("/metadata/pay_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadRequest("Webhook metadata has no pay_id".to_string()))?;
    let pay_id = Uuid::parse_str(pay_id)
        .map_err(|_| AppError::BadRequest("Webhook metadata pay_id is not a UUID".to_string()))?;

    let provider_status = provider_status(&event.event_type, payment_status);

    let method = object
        .pointer("/payment_method_types/0")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let pay_date = match provider_status {
        ProviderStatus::Paid => DateTime::from_timestamp(event.created, 0),
        _ => None,
    };

    Ok(PaymentEvent {
        provider_event_id: event.id,
        pay_id,
        provider_status,
        method,
        pay_date,
    })
}

/// Verifies then parses a delivery.
pub fn construct_event(
    header: Option<&str>,
    payload: &[u8],
    secret: &str,
    now: DateTime<Utc>,
) -> AppResult<PaymentEvent> {
    let header = header.ok_or_else(|| signature_error("missing Stripe-Signature header"))?;
    verify_signature(header, payload, secret, now)?;
    parse_event(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn header_for(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let signature = hex::encode(sign(secret, &timestamp.to_string(), payload).unwrap());
        format!("t={},v1={}", timestamp, signature)
    }

    fn completed_session(pay_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_123",
            "type": "checkout.session.completed",
            "created": 1_749_600_000,
            "data": {
                "object": {
                    "payment_status": "paid",
                    "payment_method_types": ["card"],
                    "metadata": { "pay_id": pay_id }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_verify_signature_valid() {
        let now = Utc::now();
        let payload = b"{\"test\":\"data\"}";
        let header = header_for(payload, SECRET, now.timestamp());

        assert!(verify_signature(&header, payload, SECRET, now).is_ok());
    }

    #[test]
    fn test_verify_signature_wrong_secret() {
        let now = Utc::now();
        let payload = b"{\"test\":\"data\"}";
        let header = header_for(payload, "wrong_secret", now.timestamp());

        assert!(matches!(
            verify_signature(&header, payload, SECRET, now),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_verify_signature_tampered_payload() {
        let now = Utc::now();
        let header = header_for(b"{\"test\":\"data\"}", SECRET, now.timestamp());

        assert!(verify_signature(&header, b"{\"test\":\"hacked\"}", SECRET, now).is_err());
    }

    #[test]
    fn test_verify_signature_stale_timestamp() {
        let now = Utc::now();
        let payload = b"{}";
        let header = header_for(payload, SECRET, now.timestamp() - TOLERANCE_SECS - 1);

        assert!(verify_signature(&header, payload, SECRET, now).is_err());
    }

    #[test]
    fn test_verify_signature_invalid_header_format() {
        let now = Utc::now();

        assert!(verify_signature("abc123", b"{}", SECRET, now).is_err());
        assert!(verify_signature(&format!("t={}", now.timestamp()), b"{}", SECRET, now).is_err());
        assert!(verify_signature(&format!("t={},v1=zzzz", now.timestamp()), b"{}", SECRET, now).is_err());
    }

    #[test]
    fn test_any_v1_signature_may_match() {
        let now = Utc::now();
        let payload = b"{}";
        let signature = hex::encode(sign(SECRET, &now.timestamp().to_string(), payload).unwrap());
        let header = format!("t={},v1={},v1={}", now.timestamp(), "0".repeat(64), signature);

        assert!(verify_signature(&header, payload, SECRET, now).is_ok());
    }

    #[test]
    fn test_parse_paid_session() {
        let pay_id = Uuid::new_v4();
        let event = parse_event(&completed_session(&pay_id.to_string())).unwrap();

        assert_eq!(event.provider_event_id, "evt_123");
        assert_eq!(event.pay_id, pay_id);
        assert_eq!(event.provider_status, ProviderStatus::Paid);
        assert_eq!(event.method.as_deref(), Some("card"));
        assert_eq!(event.pay_date, DateTime::from_timestamp(1_749_600_000, 0));
    }

    #[test]
    fn test_parse_expired_session() {
        let payload = serde_json::to_vec(&json!({
            "id": "evt_9",
            "type": "checkout.session.expired",
            "created": 1,
            "data": { "object": {
                "payment_status": "unpaid",
                "metadata": { "pay_id": Uuid::nil().to_string() }
            }}
        }))
        .unwrap();

        let event = parse_event(&payload).unwrap();
        assert_eq!(event.provider_status, ProviderStatus::Expired);
        assert_eq!(event.pay_date, None);
    }

    #[test]
    fn test_missing_fields_are_bad_requests() {
        let no_status = serde_json::to_vec(&json!({
            "id": "evt_1", "type": "checkout.session.completed", "created": 1,
            "data": { "object": { "metadata": { "pay_id": Uuid::nil().to_string() } } }
        }))
        .unwrap();
        assert!(matches!(parse_event(&no_status), Err(AppError::BadRequest(_))));

        let no_pay_id = serde_json::to_vec(&json!({
            "id": "evt_1", "type": "checkout.session.completed", "created": 1,
            "data": { "object": { "payment_status": "paid", "metadata": {} } }
        }))
        .unwrap();
        assert!(matches!(parse_event(&no_pay_id), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_construct_event_without_header_is_unauthorized() {
        let payload = completed_session(&Uuid::nil().to_string());

        assert!(matches!(
            construct_event(None, &payload, SECRET, Utc::now()),
            Err(AppError::Unauthorized(_))
        ));
    }
}
