pub mod admin;
pub mod checkout;
pub mod public;
pub mod webhooks;

use axum::Router;

use crate::db::AppState;

/// Full application router, without state or outer layers.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(public::router())
        .merge(checkout::router())
        .merge(webhooks::router())
        .merge(admin::router(state))
}
