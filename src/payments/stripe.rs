use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};

use super::{
    CheckoutSession, CheckoutSessionRequest, CompletedPayment, PaymentProcessor, ProcessorEvent,
    ProcessorEventKind,
};

type HmacSha256 = Hmac<Sha256>;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Allowed clock skew for webhook timestamps from the future.
const FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
    tolerance_secs: i64,
}

impl StripeClient {
    pub fn new(
        api_base: &str,
        secret_key: &str,
        webhook_secret: &str,
        tolerance_secs: i64,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
            tolerance_secs,
        })
    }
}

/// Form fields for `POST /v1/checkout/sessions` with ad-hoc price data.
fn checkout_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), request.currency.clone()),
        ("line_items[0][price_data][unit_amount]".into(), request.amount.to_string()),
        (
            "line_items[0][price_data][product_data][name]".into(),
            request.description.clone(),
        ),
        ("metadata[target_type]".into(), request.target_type.as_ref().to_string()),
        ("metadata[target_id]".into(), request.target_id.clone()),
        ("metadata[team_id]".into(), request.team_id.clone()),
        ("metadata[amount]".into(), request.amount.to_string()),
    ];
    if let Some(ref payer_id) = request.payer_id {
        form.push(("metadata[payer_id]".into(), payer_id.clone()));
    }
    if let Some(ref email) = request.payer_email {
        form.push(("metadata[payer_email]".into(), email.clone()));
        form.push(("customer_email".into(), email.clone()));
    }
    form
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        STRIPE_SIGNATURE_HEADER
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&checkout_form(request))
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamUnavailable(format!(
                "Stripe API error ({}): {}",
                status, error_text
            )));
        }

        let session: CreateCheckoutSessionResponse = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to parse Stripe response: {}", e))
        })?;

        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
        })
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        verify_stripe_signature(&self.webhook_secret, self.tolerance_secs, payload, signature)
    }

    fn parse_event(&self, payload: &[u8]) -> Result<ProcessorEvent> {
        parse_stripe_event(payload)
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, the `v1` scheme.
pub fn compute_stripe_signature(secret: &str, timestamp: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a `t=<unix>,v1=<hex>` signature header.
///
/// Malformed headers are errors. Stale, future-dated or mismatched signatures
/// return Ok(false). Any one of several `v1` entries may match (secret rotation).
pub fn verify_stripe_signature(
    secret: &str,
    tolerance_secs: i64,
    payload: &[u8],
    signature: &str,
) -> Result<bool> {
    if secret.is_empty() {
        tracing::warn!("Webhook rejected: no webhook secret configured");
        return Ok(false);
    }

    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in signature.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            candidates.push(s);
        }
    }

    let timestamp_str =
        timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
    if candidates.is_empty() {
        return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
    }

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

    let Some(age) = chrono::Utc::now().timestamp().checked_sub(timestamp) else {
        tracing::warn!("Webhook rejected: timestamp out of range ({})", timestamp);
        return Ok(false);
    };

    if age > tolerance_secs {
        tracing::warn!(
            "Webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            tolerance_secs
        );
        return Ok(false);
    }

    if age < -FUTURE_SKEW_SECS {
        tracing::warn!("Webhook rejected: timestamp in the future (age={}s)", age);
        return Ok(false);
    }

    let expected = compute_stripe_signature(secret, timestamp_str, payload)?;
    let expected_bytes = expected.as_bytes();

    // Signature length is not secret (always 64 hex chars), only content is compared in constant time
    Ok(candidates.iter().any(|provided| {
        let provided_bytes = provided.as_bytes();
        provided_bytes.len() == expected_bytes.len()
            && bool::from(expected_bytes.ct_eq(provided_bytes))
    }))
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.* ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub payment_status: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
}

impl StripeCheckoutSession {
    fn into_completed_payment(self) -> CompletedPayment {
        let mut metadata = self.metadata;
        let metadata_amount = metadata.get("amount").and_then(|a| a.trim().parse().ok());
        let payer_email = metadata
            .remove("payer_email")
            .or(self.customer_email)
            .or_else(|| self.customer_details.and_then(|d| d.email));

        CompletedPayment {
            amount: self.amount_total.or(metadata_amount),
            currency: self.currency.map(|c| c.to_lowercase()),
            target_type: metadata.remove("target_type"),
            target_id: metadata.remove("target_id"),
            team_id: metadata.remove("team_id"),
            payer_id: metadata.remove("payer_id"),
            payer_email,
            method: self
                .payment_method_types
                .into_iter()
                .next()
                .unwrap_or_else(|| "card".to_string()),
            provider_payment_ref: self.payment_intent.or(Some(self.id)),
        }
    }
}

/// Decode a Stripe webhook body into a processor event.
///
/// `checkout.session.completed` only counts once the session is paid; delayed
/// methods report completion later through `checkout.session.async_payment_succeeded`.
pub fn parse_stripe_event(payload: &[u8]) -> Result<ProcessorEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| AppError::BadRequest(format!("{}: {}", msg::INVALID_PAYLOAD, e)))?;

    let kind = match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            match serde_json::from_value::<StripeCheckoutSession>(event.data.object) {
                Ok(session) => {
                    let paid = event.event_type == "checkout.session.async_payment_succeeded"
                        || session.payment_status.as_deref() == Some("paid");
                    if paid {
                        ProcessorEventKind::PaymentCompleted(session.into_completed_payment())
                    } else {
                        ProcessorEventKind::Other
                    }
                }
                // Signed and addressable, so it is recorded and rejected rather than bounced
                Err(e) => {
                    ProcessorEventKind::Malformed(format!("undecodable checkout session: {}", e))
                }
            }
        }
        _ => ProcessorEventKind::Other,
    };

    Ok(ProcessorEvent {
        id: event.id,
        event_type: event.event_type,
        kind,
    })
}
