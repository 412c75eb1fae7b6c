//! Metrics collection (SPEC_FULL.md §4.11): wraps every request with the
//! active-request gauge and records the method/endpoint/status counter and
//! duration histogram components once it completes. `/metrics` itself lives
//! on a separate listener (`main.rs`) and is never wrapped by this layer.

use std::{sync::Arc, time::Instant};

use axum::{extract::Request, extract::State, middleware::Next, response::Response};

use crate::state::AppState;

pub async fn metrics_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = req.uri().path().to_string();

    state.metrics.inc_active();
    let start = Instant::now();

    let response = next.run(req).await;

    state.metrics.dec_active();
    let duration = start.elapsed().as_secs_f64();
    state.metrics.record_request(&method, &endpoint, response.status().as_u16(), duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    async fn test_state() -> Arc<AppState> {
        std::env::set_var("ENABLE_AUTH", "false");
        let config = crate::config::Config::from_env().unwrap();
        std::env::remove_var("ENABLE_AUTH");
        AppState::new(config, Arc::new(crate::kernel::EchoKernel)).await.unwrap()
    }

    #[tokio::test]
    async fn successful_request_is_counted_and_active_gauge_returns_to_zero() {
        let state = test_state().await;
        let app = Router::new()
            .route("/x", get(ok_handler))
            .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), metrics_middleware))
            .with_state(Arc::clone(&state));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let rendered = state.metrics.render();
        assert!(rendered.contains("llm_requests_total{method=\"GET\",endpoint=\"/x\",status=\"2xx\"} 1"));
        assert!(rendered.contains("llm_active_requests 0"));
    }
}
