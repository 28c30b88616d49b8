//! Defines routes for the upload gateway.
//!
//! ## Structure
//! - `GET  /health`     — liveness
//! - `GET  /readyz`     — readiness (disk probe)
//! - `POST /upload`     — upload a file (multipart, `x-user-id` required)
//! - `GET  /files/{id}` — download a file owned by the caller

use crate::{
    handlers::{
        file_handlers::{download_file, upload_file},
        health_handlers::{health, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all gateway routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        // The upload pipeline enforces its own streaming cap.
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/files/{id}", get(download_file))
}
