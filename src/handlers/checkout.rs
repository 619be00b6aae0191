use axum::{Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::Json;
use crate::models::TargetType;
use crate::payments::CheckoutSessionRequest;

/// Contribution request for either checkout endpoint.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Amount in minor units
    pub amount: i64,
    pub target_id: String,
    #[serde(default)]
    pub payer_id: Option<String>,
    #[serde(default)]
    pub payer_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub redirect_url: String,
}

/// Target details resolved before talking to the processor.
struct ResolvedTarget {
    target_type: TargetType,
    team_id: String,
    currency: String,
    description: String,
}

fn validate_common(state: &AppState, request: &CheckoutRequest) -> Result<()> {
    if request.amount <= 0 {
        return Err(AppError::Validation(msg::AMOUNT_NOT_POSITIVE.into()));
    }
    if request.amount > state.config.max_contribution_cents {
        return Err(AppError::Validation(msg::AMOUNT_TOO_LARGE.into()));
    }
    if let Some(ref email) = request.payer_email {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation(msg::INVALID_PAYER_EMAIL.into()));
        }
    }
    Ok(())
}

pub async fn checkout_fundraiser(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let target = {
        let conn = state.db.get()?;
        let fundraiser = queries::get_fundraiser_by_id(&conn, &request.target_id)?
            .or_not_found(msg::FUNDRAISER_NOT_FOUND)?;

        validate_common(&state, &request)?;
        if !fundraiser.accepts_contributions() {
            return Err(AppError::Validation(msg::FUNDRAISER_CLOSED.into()));
        }

        ResolvedTarget {
            target_type: TargetType::Fundraiser,
            team_id: fundraiser.team_id,
            currency: fundraiser.currency,
            description: format!("Contribution to {}", fundraiser.name),
        }
    };

    start_checkout(&state, request, target).await
}

pub async fn checkout_event(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let target = {
        let conn = state.db.get()?;
        let event = queries::get_event_by_id(&conn, &request.target_id)?
            .or_not_found(msg::EVENT_NOT_FOUND)?;

        validate_common(&state, &request)?;
        if !event.is_on_sale() {
            return Err(AppError::Validation(msg::EVENT_NOT_ON_SALE.into()));
        }
        if event.ticket_price.is_some_and(|price| price != request.amount) {
            return Err(AppError::Validation(msg::TICKET_PRICE_MISMATCH.into()));
        }

        ResolvedTarget {
            target_type: TargetType::EventTicket,
            team_id: event.team_id,
            currency: event.currency,
            description: format!("Ticket: {}", event.name),
        }
    };

    start_checkout(&state, request, target).await
}

/// Ask the processor for a hosted session. Nothing is persisted here; the
/// ledger only learns about the payment from the completion webhook.
async fn start_checkout(
    state: &AppState,
    request: CheckoutRequest,
    target: ResolvedTarget,
) -> Result<Json<CheckoutResponse>> {
    let base_url = &state.config.base_url;
    let session_request = CheckoutSessionRequest {
        target_type: target.target_type,
        target_id: request.target_id.clone(),
        team_id: target.team_id,
        amount: request.amount,
        currency: target.currency,
        description: target.description,
        payer_id: request.payer_id,
        payer_email: request.payer_email.map(|e| e.trim().to_string()),
        success_url: format!(
            "{}/checkout/complete?target={}",
            base_url, request.target_id
        ),
        cancel_url: format!(
            "{}/checkout/cancelled?target={}",
            base_url, request.target_id
        ),
    };

    let session = tokio::time::timeout(
        state.config.checkout_timeout,
        state.processor.create_checkout_session(&session_request),
    )
    .await
    .map_err(|_| {
        AppError::UpstreamUnavailable(format!(
            "checkout session timed out after {}s",
            state.config.checkout_timeout.as_secs()
        ))
    })?
    .map_err(|e| match e {
        AppError::UpstreamUnavailable(_) => e,
        other => AppError::UpstreamUnavailable(other.to_string()),
    })?;

    tracing::info!(
        "Checkout session {} created for {} {} ({} {})",
        session.id,
        session_request.target_type.as_ref(),
        session_request.target_id,
        session_request.amount,
        session_request.currency
    );

    Ok(Json(CheckoutResponse {
        redirect_url: session.url,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checkout/fundraiser", post(checkout_fundraiser))
        .route("/checkout/event", post(checkout_event))
}
