//! Upload gateway: validates untrusted uploads, stores them under
//! server-generated names and serves them back only to their uploader.

use axum::Router;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;

/// Build the full application router over the given state.
pub fn build_app(state: AppState) -> Router {
    routes::routes::routes().with_state(state)
}
