mod stripe;

pub use stripe::*;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::TargetType;

/// What the hosted checkout needs to charge a supporter.
///
/// Target and payer identity ride along as processor metadata and come back
/// verbatim in the completion webhook.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub target_type: TargetType,
    pub target_id: String,
    pub team_id: String,
    /// Amount in minor units
    pub amount: i64,
    pub currency: String,
    /// Line item label shown on the hosted checkout page
    pub description: String,
    pub payer_id: Option<String>,
    pub payer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// A decoded, signature-verified processor notification.
#[derive(Debug, Clone)]
pub struct ProcessorEvent {
    pub id: String,
    pub event_type: String,
    pub kind: ProcessorEventKind,
}

#[derive(Debug, Clone)]
pub enum ProcessorEventKind {
    /// Money has moved. Fields are as reported; validation happens in the ledger.
    PaymentCompleted(CompletedPayment),
    /// Authentic event whose object could not be decoded; recorded as rejected
    Malformed(String),
    /// Anything the ledger does not act on
    Other,
}

#[derive(Debug, Clone, Default)]
pub struct CompletedPayment {
    /// Processor-reported total, falling back to the amount echoed in metadata
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    /// Owning team echoed from checkout; must match the target's team when present
    pub team_id: Option<String>,
    pub payer_id: Option<String>,
    pub payer_email: Option<String>,
    pub method: String,
    pub provider_payment_ref: Option<String>,
}

/// Hosted-checkout payment processor.
///
/// Injected into `AppState` so handlers never construct clients themselves.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Provider tag stored on inbound events (e.g. "stripe")
    fn provider_name(&self) -> &'static str;

    /// Request header carrying the webhook signature
    fn signature_header(&self) -> &'static str;

    async fn create_checkout_session(&self, request: &CheckoutSessionRequest)
    -> Result<CheckoutSession>;

    /// Verify the raw webhook body against its signature header.
    /// Ok(false) for a well-formed but wrong or stale signature.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool>;

    /// Decode a verified webhook body.
    fn parse_event(&self, payload: &[u8]) -> Result<ProcessorEvent>;
}
