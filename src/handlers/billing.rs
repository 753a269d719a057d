use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    Extension, Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::auth::middleware::AuthUser;
use crate::error::{AppError, AppResult};
use crate::services::billing::BillingRedirect;
use crate::services::subscription::GateCheck;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// GET /api/billing/subscription
///
/// Always asks the billing provider; the stored snapshot is updated on the way.
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<GateCheck>> {
    let check = state.gate.refresh(&auth_user.email).await?;
    Ok(Json(check))
}

/// POST /api/billing/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    headers: HeaderMap,
) -> AppResult<Json<BillingRedirect>> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|o| !o.is_empty())
        .unwrap_or(&state.config.frontend_url)
        .trim_end_matches('/')
        .to_string();

    let redirect = state
        .gate
        .billing()
        .checkout_or_portal(&auth_user.email, &origin)
        .await?;

    tracing::info!(email = %auth_user.email, kind = ?redirect.kind, "Billing redirect created");
    Ok(Json(redirect))
}

fn signature_error(message: &str) -> AppError {
    AppError::validation("stripe-signature", message)
}

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
#[derive(Debug)]
struct StripeSignature {
    timestamp: i64,
    candidates: Vec<Vec<u8>>,
}

impl StripeSignature {
    fn parse(header: &str) -> Result<Self, AppError> {
        let mut timestamp = None;
        let mut candidates = Vec::new();

        for (key, value) in header.split(',').filter_map(|part| part.trim().split_once('=')) {
            match key {
                "t" => {
                    let ts = value
                        .parse::<i64>()
                        .map_err(|_| signature_error("Invalid timestamp in Stripe-Signature"))?;
                    timestamp = Some(ts);
                }
                // Undecodable candidates can never match; skip them.
                "v1" => candidates.extend(hex::decode(value).ok()),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| signature_error("Missing timestamp in Stripe-Signature"))?;
        if candidates.is_empty() {
            return Err(signature_error("Missing v1 signature in Stripe-Signature"));
        }
        Ok(Self {
            timestamp,
            candidates,
        })
    }

    fn verify(&self, payload: &[u8], secret: &str, now: i64) -> Result<(), AppError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid webhook secret")))?;
        mac.update(self.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        // verify_slice compares in constant time
        let matched = self
            .candidates
            .iter()
            .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
        if !matched {
            return Err(signature_error("Invalid Stripe webhook signature"));
        }

        if (now - self.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(signature_error("Stripe webhook timestamp outside tolerance"));
        }
        Ok(())
    }
}

fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), AppError> {
    StripeSignature::parse(header)?.verify(payload, secret, now)
}

/// Email carried by a completed checkout session, if any.
fn checkout_email(object: &serde_json::Value) -> Option<String> {
    object["customer_details"]["email"]
        .as_str()
        .or_else(|| object["customer_email"].as_str())
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    if !state.config.stripe_webhook_secret.is_empty() {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| signature_error("Missing Stripe-Signature header"))?;
        let now = chrono::Utc::now().timestamp();
        verify_stripe_signature(&body, signature, &state.config.stripe_webhook_secret, now)?;
    } else {
        tracing::warn!("Stripe webhook secret not configured, signature verification skipped");
    }

    let event: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::validation("body", format!("Invalid webhook payload: {}", e)))?;

    let event_id = event["id"].as_str().unwrap_or("");
    let event_type = event["type"].as_str().unwrap_or("");

    if !event_id.is_empty() {
        let inserted = sqlx::query(
            "INSERT INTO stripe_events (event_id, event_type) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&state.db)
        .await?
        .rows_affected();

        if inserted == 0 {
            tracing::debug!(event_id = event_id, "Stripe event already processed, skipping");
            return Ok(Json(serde_json::json!({ "received": true, "duplicate": true })));
        }
    }

    tracing::info!(event_type = event_type, event_id = event_id, "Stripe webhook received");

    let object = &event["data"]["object"];
    let customer_id = object["customer"].as_str().unwrap_or("");

    match event_type {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            if !customer_id.is_empty() {
                state.gate.refresh_customer(customer_id).await?;
            }
        }
        "checkout.session.completed" => {
            if let Some(email) = checkout_email(object) {
                state.gate.refresh(&email).await?;
            } else if !customer_id.is_empty() {
                state.gate.refresh_customer(customer_id).await?;
            }
        }
        _ => {
            tracing::debug!(event_type = event_type, "Unhandled Stripe event");
        }
    }

    Ok(Json(serde_json::json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign(payload: &[u8], secret: &str, ts: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", ts, String::from_utf8_lossy(payload)).as_bytes());
        format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign(payload, "whsec_test", 1_700_000_000);
        assert!(verify_stripe_signature(payload, &header, "whsec_test", 1_700_000_100).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign(payload, "whsec_other", 1_700_000_000);
        assert!(verify_stripe_signature(payload, &header, "whsec_test", 1_700_000_000).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign(payload, "whsec_test", 1_700_000_000);
        let later = 1_700_000_000 + SIGNATURE_TOLERANCE_SECS + 1;
        assert!(verify_stripe_signature(payload, &header, "whsec_test", later).is_err());
    }

    #[test]
    fn test_missing_parts_rejected() {
        assert!(verify_stripe_signature(b"{}", "v1=abcd", "whsec_test", 0).is_err());
        assert!(verify_stripe_signature(b"{}", "t=0", "whsec_test", 0).is_err());
        assert!(verify_stripe_signature(b"{}", "t=0,v1=not-hex", "whsec_test", 0).is_err());
    }

    #[test]
    fn test_any_matching_candidate_accepted() {
        let payload = br#"{"id":"evt_2"}"#;
        let valid = sign(payload, "whsec_test", 1_700_000_000);
        let header = format!("t=1700000000,v1={},{}", "00".repeat(32), &valid[13..]);
        assert!(verify_stripe_signature(payload, &header, "whsec_test", 1_700_000_000).is_ok());
    }

    #[test]
    fn test_checkout_email_prefers_customer_details() {
        let object = json!({
            "customer_details": { "email": "Owner@Example.com" },
            "customer_email": "other@example.com",
        });
        assert_eq!(checkout_email(&object).as_deref(), Some("owner@example.com"));

        let object = json!({ "customer_email": "other@example.com" });
        assert_eq!(checkout_email(&object).as_deref(), Some("other@example.com"));

        assert!(checkout_email(&json!({ "customer": "cus_1" })).is_none());
    }
}
