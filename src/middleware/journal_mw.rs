//! Request journal middleware (SPEC_FULL.md §4.9): intercepts mutating
//! requests, records them to disk before dispatch, and transitions them to
//! `completed`/`failed` once the handler returns. No teacher exemplar for
//! file-backed request capture existed; grounded on the teacher's
//! `traffic.rs` in-memory capture shape, generalized to durable storage via
//! [`crate::journal::Journal`].

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::journal::{JournalEntry, JournalStatus};
use crate::state::AppState;

const MAX_JOURNALED_BODY: usize = 2 * 1024 * 1024;
const EXEMPT_PATHS: &[&str] = &["/healthz", "/metrics"];

pub async fn journal_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mutating = matches!(method.as_str(), "POST" | "PUT" | "PATCH");
    if !mutating || EXEMPT_PATHS.iter().any(|p| path == *p) {
        return next.run(req).await;
    }

    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter(|(name, _)| *name != "authorization")
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
        .collect();

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_JOURNALED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return (axum::http::StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response(),
    };
    let body_string = String::from_utf8_lossy(&bytes).to_string();
    let model = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|v| v.get("model").and_then(|m| m.as_str()).map(str::to_string));

    let mut entry = JournalEntry {
        id: id.clone(),
        path,
        method: method.to_string(),
        headers,
        body: body_string,
        timestamp: chrono::Utc::now(),
        model,
        status: JournalStatus::Pending,
        retry: 0,
    };

    if let Err(error) = state.journal.record_pending(&entry).await {
        tracing::warn!(%error, request_id = %id, "failed to record journal entry");
    }
    if let Err(error) = state.journal.mark_processing(&mut entry).await {
        tracing::warn!(%error, request_id = %id, "failed to mark journal entry processing");
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    let mut response = next.run(req).await;

    if let Ok(header_value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", header_value);
    }

    if response.status().as_u16() < 400 {
        if let Err(error) = state.journal.mark_completed(&entry).await {
            tracing::warn!(%error, request_id = %id, "failed to mark journal entry completed");
        }
    } else if let Err(error) = state
        .journal
        .mark_failed(&entry, &format!("http {}", response.status().as_u16()))
        .await
    {
        tracing::warn!(%error, request_id = %id, "failed to mark journal entry failed");
    }

    response
}
