//! Model catalog and lifecycle endpoints (SPEC_FULL.md §4.5): list the
//! admissible whitelist, inspect one entry, and force-load/unload it.
//! Grounded on the teacher's `admin.rs` admin-surface shape, backed by
//! [`crate::registry::Registry`] and [`crate::lifecycle::LifecycleManager`].

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::error::GatewayError;
use crate::state::AppState;

/// A model id may contain `/` (e.g. org-qualified names); clients escape it
/// as `--` in the path segment, per SPEC_FULL.md §4.5.
fn unescape_model_id(segment: &str) -> String {
    segment.replace("--", "/")
}

/// `GET {prefix}/models` — the full admissible whitelist.
pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models: Vec<_> = state
        .registry
        .all()
        .map(|d| {
            json!({
                "id": d.id,
                "aliases": d.aliases,
                "memory_gb": d.memory_gb,
                "context_window": d.context_window,
                "auto_load": d.auto_load,
                "loaded": state.lifecycle.is_loaded(&d.id),
            })
        })
        .collect();
    Json(json!({ "data": models }))
}

/// `GET {prefix}/models/{id}` — one catalog entry.
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let id = unescape_model_id(&id);
    let descriptor = state
        .registry
        .resolve(&id)
        .ok_or_else(|| GatewayError::ModelNotFound(id.clone()))?;
    Ok(Json(json!({
        "id": descriptor.id,
        "aliases": descriptor.aliases,
        "memory_gb": descriptor.memory_gb,
        "context_window": descriptor.context_window,
        "auto_load": descriptor.auto_load,
        "fallback": descriptor.fallback,
        "loaded": state.lifecycle.is_loaded(&descriptor.id),
    })))
}

/// `POST {prefix}/models/{id}/load` — force-load outside the request path.
pub async fn load_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let id = unescape_model_id(&id);
    state
        .lifecycle
        .load(&id)
        .await
        .map_err(map_lifecycle_error)?;
    Ok(Json(json!({ "id": id, "loaded": true })))
}

/// `POST {prefix}/models/{id}/unload` — release the model's memory.
pub async fn unload_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let id = unescape_model_id(&id);
    state
        .lifecycle
        .unload(&id)
        .await
        .map_err(map_lifecycle_error)?;
    Ok(Json(json!({ "id": id, "loaded": false })))
}

/// `GET {prefix}/models/memory/usage` — current kernel memory snapshot.
pub async fn memory_usage(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let usage = state.lifecycle.memory_usage();
    Json(json!({
        "active_gb": usage.active_gb,
        "peak_gb": usage.peak_gb,
        "cache_gb": usage.cache_gb,
        "limit_gb": state.config.max_model_memory_gb,
    }))
}

fn map_lifecycle_error(error: crate::lifecycle::LifecycleError) -> GatewayError {
    use crate::lifecycle::LifecycleError;
    match error {
        LifecycleError::NotFound(id) => GatewayError::ModelNotFound(id),
        LifecycleError::NotAdmissible(id) => GatewayError::ModelNotAdmissible(id),
        LifecycleError::LoadFailed { model, reason } => GatewayError::LoadFailed { model, reason },
        LifecycleError::Generation(reason) => GatewayError::GenerationFailed(reason),
        LifecycleError::StreamEnded => GatewayError::GenerationFailed("stream ended".into()),
    }
}
