//! Liveness and status probes. `healthz` is the teacher's original
//! dependency-free probe, unchanged; `health` is new, grounded on it and on
//! `LifecycleManager::memory_usage`/`loaded_models`, for the prefixed
//! status endpoint SPEC_FULL.md §4.5 describes.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /healthz` — always returns 200 OK with `{"status": "ok"}`.
///
/// This endpoint has no dependencies and never blocks, making it safe to use
/// as a Docker / Kubernetes liveness probe.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET {prefix}/health` — status plus memory and loaded-model snapshot.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let memory = state.lifecycle.memory_usage();
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime_secs(),
        "memory_usage": {
            "active_gb": memory.active_gb,
            "peak_gb": memory.peak_gb,
            "cache_gb": memory.cache_gb,
        },
        "loaded_models": state.lifecycle.loaded_models(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_reports_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
