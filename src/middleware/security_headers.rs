//! Security headers and trusted-host enforcement (SPEC_FULL.md §4.8). Not
//! present in the teacher (whose middleware chain stops at auth); added as
//! an axum `from_fn` layer in the same style as `request_id_middleware`.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::Host;
use std::sync::Arc;

use crate::state::AppState;

pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'self'"),
    );
    response
}

/// Rejects requests whose `Host` header doesn't match an allowed origin.
/// A wildcard entry (`*`) in `ALLOWED_ORIGINS` disables this check —
/// intended for development only.
pub async fn trusted_host_middleware(
    State(state): State<Arc<AppState>>,
    Host(host): Host,
    req: Request,
    next: Next,
) -> Response {
    let origins = &state.config.allowed_origins;
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return next.run(req).await;
    }

    let host_name = host.split(':').next().unwrap_or(&host);
    if origins.iter().any(|o| o == host_name) {
        next.run(req).await
    } else {
        (StatusCode::BAD_REQUEST, "untrusted host").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    async fn handler() -> &'static str {
        "ok"
    }

    #[tokio::test]
    async fn security_headers_are_applied() {
        let app = Router::new()
            .route("/", get(handler))
            .layer(axum::middleware::from_fn(security_headers_middleware));
        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }
}
