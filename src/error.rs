//! Typed error taxonomy for the gateway's HTTP surface.
//!
//! Every handler returns `Result<T, GatewayError>`. [`GatewayError`]
//! implements [`IntoResponse`] and renders the `{error:{message,type}}`
//! envelope clients expect, while [`GatewayError::journal_reason`] gives the
//! request journal the same text without re-deriving the message twice.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid credentials")]
    Unauthenticated,

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("model not admissible: {0}")]
    ModelNotAdmissible(String),

    #[error("failed to load model {model}: {reason}")]
    LoadFailed { model: String, reason: String },

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("upstream timeout")]
    UpstreamTimeout,

    /// Any error that doesn't fit the taxonomy above — config/IO/serde
    /// failures at the process boundary. Renders as a generic 500.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_request_error",
            Self::Unauthenticated => "authentication_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::ModelNotFound(_) => "not_found_error",
            Self::ModelNotAdmissible(_) => "invalid_request_error",
            Self::LoadFailed { .. } => "server_error",
            Self::GenerationFailed(_) => "server_error",
            Self::SessionNotFound(_) => "not_found_error",
            Self::UpstreamTimeout => "timeout_error",
            Self::Internal(_) => "server_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::ModelNotAdmissible(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ModelNotFound(_) | Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::LoadFailed { .. } | Self::GenerationFailed(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Reason string recorded in a journal `failed/` entry — the single
    /// source of truth shared with the HTTP response body.
    pub fn journal_reason(&self) -> String {
        self.to_string()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = %status, "request failed");

        let mut response = (
            status,
            Json(json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.kind(),
                }
            })),
        )
            .into_response();

        if let Self::RateLimited { retry_after_secs } = &self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}
