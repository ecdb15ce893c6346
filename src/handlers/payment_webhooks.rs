use crate::services::fulfillment::{CompletedCheckout, WebhookEvent, CHECKOUT_COMPLETED_EVENT};
use crate::{errors::ServiceError, AppState};
use axum::{body::Bytes, extract::State, http::HeaderMap, response::IntoResponse, Json};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// POST /api/v1/payments/webhook
///
/// Fulfillment entry point. The signature gate is the only authentication;
/// past it, processing failures are logged and the notification is still
/// acknowledged with 200 so the processor stops retrying — redelivery of a
/// partially processed notification is already safe.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Notification accepted"),
        (status = 400, description = "Malformed or unfulfillable payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Signature verification failed", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let secret = state.config.stripe_webhook_secret.as_deref().ok_or_else(|| {
        ServiceError::MissingConfiguration("Webhook signing secret is not configured".to_string())
    })?;

    if !verify_signature(
        &headers,
        &body,
        secret,
        state.config.stripe_webhook_tolerance_secs,
    ) {
        warn!("Webhook signature verification failed");
        return Err(ServiceError::Unauthorized(
            "Invalid webhook signature".to_string(),
        ));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

    if event.event_type != CHECKOUT_COMPLETED_EVENT {
        info!(event_type = %event.event_type, "Ignoring unhandled webhook event type");
        return Ok(Json(json!({ "received": true })));
    }

    let checkout = CompletedCheckout::from_session(event.into_session()?)?;
    let outcome = state.services.fulfillment.fulfill(checkout).await;
    info!(
        inserted = outcome.purchases_inserted,
        replayed = outcome.purchases_replayed,
        entitlement_failure = outcome.entitlement_failure,
        "Webhook fulfillment finished"
    );

    Ok(Json(json!({ "received": true })))
}

/// Verifies the processor's `Stripe-Signature` header: HMAC-SHA256 over
/// `"{t}.{body}"` with the signing secret, plus a timestamp freshness check
/// to blunt replay of captured requests.
fn verify_signature(headers: &HeaderMap, payload: &[u8], secret: &str, tolerance_secs: u64) -> bool {
    let Some(header) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) else {
        return false;
    };

    let mut timestamp = "";
    let mut signature = "";
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(value)) => timestamp = value,
            (Some("v1"), Some(value)) => signature = value,
            _ => {}
        }
    }
    if timestamp.is_empty() || signature.is_empty() {
        return false;
    }

    match timestamp.parse::<i64>() {
        Ok(ts) => {
            let now = chrono::Utc::now().timestamp();
            if (now - ts).unsigned_abs() > tolerance_secs {
                return false;
            }
        }
        Err(_) => return false,
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test";

    fn sign(body: &[u8], timestamp: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(body);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"id":"evt_1"}"#;
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign(body, now, SECRET));
        assert!(verify_signature(&headers, body, SECRET, 300));
    }

    #[test]
    fn tampered_body_fails() {
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign(br#"{"id":"evt_1"}"#, now, SECRET));
        assert!(!verify_signature(
            &headers,
            br#"{"id":"evt_2"}"#,
            SECRET,
            300
        ));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = br#"{"id":"evt_1"}"#;
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign(body, now, "whsec_other"));
        assert!(!verify_signature(&headers, body, SECRET, 300));
    }

    #[test]
    fn stale_timestamp_fails() {
        let body = br#"{"id":"evt_1"}"#;
        let stale = chrono::Utc::now().timestamp() - 3600;
        let headers = headers_with(&sign(body, stale, SECRET));
        assert!(!verify_signature(&headers, body, SECRET, 300));
    }

    #[test]
    fn missing_header_fails() {
        assert!(!verify_signature(&HeaderMap::new(), b"{}", SECRET, 300));
    }
}
