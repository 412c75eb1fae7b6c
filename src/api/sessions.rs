//! Session endpoints (SPEC_FULL.md §4.5): create, fetch, delete, and read
//! the ordered message log for a session, backed by [`crate::session::SessionStore`].

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;

use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub ttl: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

/// `POST {prefix}/sessions`.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let ttl = request.ttl.map(Duration::hours);
    let session = state
        .sessions
        .create(request.session_id, request.data, ttl)
        .await
        .map_err(backend_err)?;
    Ok(Json(json!({
        "session_id": session.id,
        "created_at": session.created_at,
        "expires_at": session.expires_at,
    })))
}

/// `GET {prefix}/sessions/{id}`.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let session = state
        .sessions
        .get(&id)
        .await
        .map_err(backend_err)?
        .ok_or_else(|| GatewayError::SessionNotFound(id.clone()))?;
    Ok(Json(json!({
        "session_id": session.id,
        "messages": session.messages,
        "metadata": session.metadata,
        "created_at": session.created_at,
        "updated_at": session.updated_at,
        "expires_at": session.expires_at,
    })))
}

/// `DELETE {prefix}/sessions/{id}`.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let deleted = state.sessions.delete(&id).await.map_err(backend_err)?;
    if !deleted {
        return Err(GatewayError::SessionNotFound(id));
    }
    Ok(Json(json!({ "session_id": id, "deleted": true })))
}

/// `GET {prefix}/sessions/{id}/messages?limit=`.
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let messages = state
        .sessions
        .get_messages(&id, query.limit)
        .await
        .map_err(backend_err)?;
    Ok(Json(json!({ "session_id": id, "messages": messages })))
}

fn backend_err(error: crate::session::SessionError) -> GatewayError {
    use crate::session::SessionError;
    match error {
        SessionError::NotFound(id) => GatewayError::SessionNotFound(id),
        SessionError::Backend(reason) => GatewayError::Internal(anyhow::anyhow!(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::EchoKernel;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        routing::{delete, get, post},
        Router as AxumRouter,
    };
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        std::env::set_var("ENABLE_AUTH", "false");
        let config = crate::config::Config::from_env().unwrap();
        std::env::remove_var("ENABLE_AUTH");
        AppState::new(config, Arc::new(EchoKernel)).await.unwrap()
    }

    fn app(state: Arc<AppState>) -> AxumRouter {
        AxumRouter::new()
            .route("/sessions", post(create_session))
            .route("/sessions/{id}", get(get_session).delete(delete_session))
            .route("/sessions/{id}/messages", get(get_messages))
            .with_state(state)
    }

    #[tokio::test]
    async fn create_then_fetch_roundtrips() {
        let state = test_state().await;
        let router = app(Arc::clone(&state));
        let create = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), StatusCode::OK);
        let bytes = to_bytes(create.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = parsed["session_id"].as_str().unwrap().to_string();

        let fetch = app(state)
            .oneshot(Request::builder().uri(format!("/sessions/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(fetch.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn fetching_unknown_session_is_404() {
        let state = test_state().await;
        let response = app(state)
            .oneshot(Request::builder().uri("/sessions/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_twice_yields_not_found_on_second_call() {
        let state = test_state().await;
        state.sessions.create(Some("s1".into()), json!({}), None).await.unwrap();
        let router = app(Arc::clone(&state));
        let first = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/sessions/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/sessions/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
    }
}
