pub mod chat;
pub mod completions;
pub mod health;
pub mod models;
pub mod sessions;

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse};

use crate::state::AppState;

/// `GET /metrics` — Prometheus text exposition, unauthenticated, excluded
/// from the journal and the rate limiter by living on its own listener.
pub async fn metrics_text(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
