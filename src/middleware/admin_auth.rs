use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::error::AppError;

pub const INTERNAL_API_KEY_HEADER: &str = "X-Internal-Api-Key";

/// Guard for the review and operations routes.
///
/// Rejects every request when no key is configured.
pub async fn require_internal_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.internal_api_key.as_deref() else {
        tracing::warn!("Admin request rejected: INTERNAL_API_KEY not configured");
        return AppError::Unauthorized.into_response();
    };

    let provided = request
        .headers()
        .get(INTERNAL_API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    let matches = provided.len() == expected.len()
        && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()));
    if !matches {
        return AppError::Unauthorized.into_response();
    }

    next.run(request).await
}
