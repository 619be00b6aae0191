//! Review and operations endpoints, guarded by the internal API key.

use axum::{
    Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::ledger;
use crate::middleware::require_internal_api_key;
use crate::models::{InboundEvent, InboundEventQuery};
use crate::pagination::Paginated;
use crate::reconcile::{self, ReconcileReport};

pub async fn list_inbound_events(
    State(state): State<AppState>,
    Query(query): Query<InboundEventQuery>,
) -> Result<Json<Paginated<InboundEvent>>> {
    let conn = state.db.get()?;
    let (items, total) = queries::list_inbound_events(&conn, &query)?;
    Ok(Json(Paginated::new(
        items,
        total,
        query.limit(),
        query.offset(),
    )))
}

#[derive(Debug, Serialize)]
pub struct RecomputeResponse {
    pub fundraiser_id: String,
    pub collected_amount: i64,
}

pub async fn recompute_fundraiser(
    State(state): State<AppState>,
    Path(fundraiser_id): Path<String>,
) -> Result<Json<RecomputeResponse>> {
    let conn = state.db.get()?;
    queries::get_fundraiser_by_id(&conn, &fundraiser_id)?.or_not_found(msg::FUNDRAISER_NOT_FOUND)?;
    let collected_amount = ledger::recompute_aggregate(&conn, &fundraiser_id)?;

    tracing::info!(
        "Fundraiser {} recomputed on request: {}",
        fundraiser_id,
        collected_amount
    );

    Ok(Json(RecomputeResponse {
        fundraiser_id,
        collected_amount,
    }))
}

pub async fn run_reconcile(State(state): State<AppState>) -> Result<Json<ReconcileReport>> {
    let conn = state.db.get()?;
    let report = reconcile::run_reconciliation(&conn)?;
    if report.tickets_enqueued > 0 {
        state.follow_up_notify.notify_one();
    }
    Ok(Json(report))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/inbound-events", get(list_inbound_events))
        .route(
            "/admin/fundraisers/{fundraiser_id}/recompute",
            post(recompute_fundraiser),
        )
        .route("/admin/reconcile", post(run_reconcile))
        .route_layer(middleware::from_fn_with_state(
            state,
            require_internal_api_key,
        ))
}
