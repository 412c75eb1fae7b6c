//! `POST {prefix}/chat/completions` (SPEC_FULL.md §4.5) — the OpenAI-subset
//! chat endpoint: route, optionally thread through a session, dispatch to
//! the lifecycle manager, and stream or return in full, with the
//! think-tag filter applied either way.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::lifecycle::{GenerationParams, LifecycleError};
use crate::router::{Caller, Router};
use crate::session::Message;
use crate::state::AppState;
use crate::think_filter::{strip_think_tags, ThinkFilter};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// `POST {prefix}/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    caller: Option<Extension<Caller>>,
    Json(mut request): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::BadRequest("messages must not be empty".into()));
    }

    let max_tokens = request
        .max_tokens
        .unwrap_or(state.config.max_tokens_default)
        .min(state.config.max_tokens_limit);

    let caller = caller.map(|Extension(c)| c).unwrap_or_default();

    let router = Router::new(&state.registry, &state.routing_rules);
    let model_id = router
        .resolve(&caller, &request.model)
        .ok_or_else(|| GatewayError::ModelNotAdmissible(request.model.clone()))?;
    request.model = model_id.clone();

    let messages = if let Some(session_id) = &request.session_id {
        let session = match state.sessions.get(session_id).await.map_err(backend_err)? {
            Some(existing) => existing,
            None => state
                .sessions
                .create(Some(session_id.clone()), json!({}), None)
                .await
                .map_err(backend_err)?,
        };
        let mut log = session.messages;
        for message in &request.messages {
            state
                .sessions
                .add_message(session_id, message.clone())
                .await
                .map_err(backend_err)?;
        }
        log.extend(request.messages.clone());
        log
    } else {
        request.messages.clone()
    };

    let params = GenerationParams {
        max_tokens,
        temperature: request.temperature.unwrap_or(1.0),
        top_p: request.top_p.unwrap_or(1.0),
        stop: request.stop.clone(),
    };

    let completion_id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = now_unix();

    // max_tokens == 0 has no room for a completion at all (SPEC_FULL.md §8):
    // the kernel always returns empty, and the frame reports "length", not
    // "stop", since nothing was ever generated to stop on.
    let finish_reason = if max_tokens == 0 { "length" } else { "stop" };

    if request.stream {
        let stream = state
            .lifecycle
            .stream_generate(&model_id, &messages, params)
            .await
            .map_err(map_lifecycle_error)?;
        Ok(sse_response(completion_id, created, model_id, finish_reason, stream))
    } else {
        let (raw, usage) = state
            .lifecycle
            .generate(&model_id, &messages, params)
            .await
            .map_err(map_lifecycle_error)?;
        let content = strip_think_tags(&raw);

        if let Some(session_id) = &request.session_id {
            let reply = Message { role: "assistant".into(), content: content.clone(), name: None };
            state.sessions.add_message(session_id, reply).await.map_err(backend_err)?;
        }

        Ok(Json(json!({
            "id": completion_id,
            "object": "chat.completion",
            "created": created,
            "model": model_id,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": finish_reason,
            }],
            "usage": Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.prompt_tokens + usage.completion_tokens,
            },
        }))
        .into_response())
    }
}

/// Frame a token stream as SSE per SPEC_FULL.md §4.5: a role-only opening
/// chunk, content-delta chunks with the think-tag filter applied, a
/// finish-reason chunk, then `[DONE]`.
fn sse_response(
    id: String,
    created: i64,
    model: String,
    finish_reason: &'static str,
    tokens: impl Stream<Item = Result<String, LifecycleError>> + Send + 'static,
) -> Response {
    let opening = Event::default().data(
        json!({
            "id": id, "object": "chat.completion.chunk", "created": created, "model": model,
            "choices": [{ "index": 0, "delta": { "role": "assistant" }, "finish_reason": null }],
        })
        .to_string(),
    );

    let id_for_deltas = id.clone();
    let model_for_deltas = model.clone();
    let mut filter = ThinkFilter::new();
    let deltas = tokens.filter_map(move |item| {
        let id = id_for_deltas.clone();
        let model = model_for_deltas.clone();
        let visible = match item {
            Ok(token) => filter.push(&token),
            Err(error) => {
                tracing::warn!(%error, "stream generation error mid-stream");
                String::new()
            }
        };
        async move {
            if visible.is_empty() {
                None
            } else {
                Some(Ok::<_, Infallible>(Event::default().data(
                    json!({
                        "id": id, "object": "chat.completion.chunk", "created": created, "model": model,
                        "choices": [{ "index": 0, "delta": { "content": visible }, "finish_reason": null }],
                    })
                    .to_string(),
                )))
            }
        }
    });

    let closing_id = id.clone();
    let closing_model = model.clone();
    let closing = futures_util::stream::once(async move {
        Ok::<_, Infallible>(Event::default().data(
            json!({
                "id": closing_id, "object": "chat.completion.chunk", "created": created, "model": closing_model,
                "choices": [{ "index": 0, "delta": {}, "finish_reason": finish_reason }],
            })
            .to_string(),
        ))
    });
    let done = futures_util::stream::once(async { Ok::<_, Infallible>(Event::default().data("[DONE]")) });

    let opening = futures_util::stream::once(async move { Ok::<_, Infallible>(opening) });
    let body = opening.chain(deltas).chain(closing).chain(done);
    Sse::new(body).into_response()
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn backend_err(error: crate::session::SessionError) -> GatewayError {
    use crate::session::SessionError;
    match error {
        SessionError::NotFound(id) => GatewayError::SessionNotFound(id),
        SessionError::Backend(reason) => GatewayError::Internal(anyhow::anyhow!(reason)),
    }
}

pub fn map_lifecycle_error(error: LifecycleError) -> GatewayError {
    match error {
        LifecycleError::NotFound(id) => GatewayError::ModelNotFound(id),
        LifecycleError::NotAdmissible(id) => GatewayError::ModelNotAdmissible(id),
        LifecycleError::LoadFailed { model, reason } => GatewayError::LoadFailed { model, reason },
        LifecycleError::Generation(reason) => GatewayError::GenerationFailed(reason),
        LifecycleError::StreamEnded => GatewayError::GenerationFailed("stream ended".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::EchoKernel;
    use axum::{body::Body, body::to_bytes, http::Request, routing::post, Router as AxumRouter};
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        std::env::set_var("ENABLE_AUTH", "false");
        let config = crate::config::Config::from_env().unwrap();
        std::env::remove_var("ENABLE_AUTH");
        AppState::new(config, Arc::new(EchoKernel)).await.unwrap()
    }

    fn app(state: Arc<AppState>) -> AxumRouter {
        AxumRouter::new()
            .route("/chat/completions", post(chat_completions))
            .with_state(state)
    }

    #[tokio::test]
    async fn non_stream_request_returns_single_json_completion() {
        let state = test_state().await;
        let body = json!({
            "model": "default",
            "messages": [{ "role": "user", "content": "hello there" }],
        });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["choices"][0]["message"]["role"], "assistant");
        assert!(parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap()
            .contains("hello"));
    }

    #[tokio::test]
    async fn empty_messages_is_rejected() {
        let state = test_state().await;
        let body = json!({ "model": "default", "messages": [] });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn inadmissible_model_falls_through_to_routed_default() {
        let state = test_state().await;
        let body = json!({ "model": "evil-net", "messages": [{ "role": "user", "content": "hi" }] });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["model"], "default");
    }

    #[tokio::test]
    async fn zero_max_tokens_yields_empty_completion_with_length_finish_reason() {
        let state = test_state().await;
        let body = json!({
            "model": "default",
            "max_tokens": 0,
            "messages": [{ "role": "user", "content": "hello there" }],
        });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["choices"][0]["message"]["content"], "");
        assert_eq!(parsed["choices"][0]["finish_reason"], "length");
    }

    #[tokio::test]
    async fn session_id_threads_messages_through_the_store() {
        let state = test_state().await;
        let body = json!({
            "model": "default",
            "session_id": "s1",
            "messages": [{ "role": "user", "content": "remember this" }],
        });
        let response = app(Arc::clone(&state))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let messages = state.sessions.get_messages("s1", None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
    }
}
