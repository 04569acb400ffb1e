//! HTTP surface. Every route lives under `/api` and speaks camelCase JSON.

pub mod accounts;
pub mod campaigns;
pub mod delivery;
pub mod error;
pub mod state;
pub mod templates;

use axum::{
    Router,
    routing::{get, post, put},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(delivery::health))
        // Accounts
        .route("/flow-accounts", get(accounts::list).post(accounts::create))
        .route("/flow-accounts/test-connection", post(accounts::test_connection))
        .route("/flow-accounts/{name}", put(accounts::update).delete(accounts::delete))
        // Templates
        .route("/templates", get(templates::list).post(templates::create))
        .route(
            "/templates/{id}",
            get(templates::get_one)
                .put(templates::update)
                .delete(templates::delete),
        )
        // Campaigns
        .route("/campaigns", get(campaigns::list).post(campaigns::create))
        .route(
            "/campaigns/{id}",
            get(campaigns::get_one)
                .put(campaigns::update)
                .delete(campaigns::delete),
        )
        .route("/campaigns/{id}/start", post(campaigns::start))
        .route("/campaigns/{id}/pause", post(campaigns::pause))
        .route("/campaigns/{id}/stop", post(campaigns::stop))
        .route(
            "/campaigns/{id}/results",
            get(campaigns::results).delete(campaigns::clear_results),
        )
        .route("/campaigns/{id}/progress", get(campaigns::progress))
        .route("/campaigns/{id}/send-email", post(campaigns::send_email))
        // One-off sends
        .route("/test-email", post(delivery::test_email))
        .route("/submit", post(delivery::submit))
        .with_state(state);

    Router::new().nest("/api", api)
}
