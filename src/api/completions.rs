//! `POST {prefix}/completions` (SPEC_FULL.md §4.5) — the legacy text
//! completion endpoint: wraps `prompt` as a single synthetic user message,
//! never touches the session store, and reports results in the legacy
//! `choices[].text` shape.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension, Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::chat::map_lifecycle_error;
use crate::error::GatewayError;
use crate::lifecycle::GenerationParams;
use crate::router::{Caller, Router};
use crate::session::Message;
use crate::state::AppState;
use crate::think_filter::strip_think_tags;

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

/// `POST {prefix}/completions`.
pub async fn completions(
    State(state): State<Arc<AppState>>,
    caller: Option<Extension<Caller>>,
    Json(mut request): Json<CompletionRequest>,
) -> Result<Response, GatewayError> {
    if request.prompt.is_empty() {
        return Err(GatewayError::BadRequest("prompt must not be empty".into()));
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

    let messages = vec![Message { role: "user".into(), content: request.prompt.clone(), name: None }];
    let params = GenerationParams {
        max_tokens,
        temperature: request.temperature.unwrap_or(1.0),
        top_p: request.top_p.unwrap_or(1.0),
        stop: request.stop.clone(),
    };

    let completion_id = format!("cmpl-{}", Uuid::new_v4());
    let created = now_unix();
    let finish_reason = if max_tokens == 0 { "length" } else { "stop" };

    if request.stream {
        let stream = state
            .lifecycle
            .stream_generate(&model_id, &messages, params)
            .await
            .map_err(map_lifecycle_error)?;
        tokio::pin!(stream);
        let mut text = String::new();
        while let Some(item) = stream.next().await {
            text.push_str(&item.map_err(map_lifecycle_error)?);
            text.push(' ');
        }
        let text = strip_think_tags(text.trim());
        Ok(Json(json!({
            "id": completion_id,
            "object": "text_completion",
            "created": created,
            "model": model_id,
            "choices": [{ "index": 0, "text": text, "finish_reason": finish_reason }],
        }))
        .into_response())
    } else {
        let (raw, usage) = state
            .lifecycle
            .generate(&model_id, &messages, params)
            .await
            .map_err(map_lifecycle_error)?;
        let text = strip_think_tags(&raw);
        Ok(Json(json!({
            "id": completion_id,
            "object": "text_completion",
            "created": created,
            "model": model_id,
            "choices": [{ "index": 0, "text": text, "finish_reason": finish_reason }],
            "usage": {
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
                "total_tokens": usage.prompt_tokens + usage.completion_tokens,
            },
        }))
        .into_response())
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
