//! Processor webhook endpoint.
//!
//! The body is taken as raw bytes and authenticated before anything is decoded
//! or written. Any delivery the ledger has taken responsibility for (applied,
//! duplicate, rejected, ignored) is acknowledged with 200 so the processor stops
//! retrying; only persistence failures return 5xx and invite a redelivery.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};

use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::ledger::{self, ApplyOutcome, Delivery};

/// Result type for webhook responses: status plus a short plain-text body.
pub type WebhookResult = (StatusCode, &'static str);

pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookResult> {
    let processor = state.processor.as_ref();

    let signature = headers
        .get(processor.signature_header())
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest(msg::MISSING_SIGNATURE.into()))?;

    if !processor.verify_webhook_signature(&body, signature)? {
        tracing::warn!("{} webhook rejected: invalid signature", processor.provider_name());
        return Err(AppError::InvalidSignature);
    }

    let event = processor.parse_event(&body)?;

    let delivery = Delivery {
        provider: processor.provider_name(),
        payload: &body,
        signature,
    };

    let outcome = {
        let mut conn = state.db.get()?;
        ledger::apply_event(&mut conn, &delivery, &event).inspect_err(|e| {
            tracing::error!("Failed to record {} event {}: {}", delivery.provider, event.id, e);
        })?
    };

    Ok(match outcome {
        ApplyOutcome::Applied(_) => {
            state.follow_up_notify.notify_one();
            (StatusCode::OK, "OK")
        }
        ApplyOutcome::Duplicate => (StatusCode::OK, "Already processed"),
        ApplyOutcome::Rejected(_) => (StatusCode::OK, "Rejected"),
        ApplyOutcome::Ignored => (StatusCode::OK, "Event ignored"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(handle_payment_webhook))
}
