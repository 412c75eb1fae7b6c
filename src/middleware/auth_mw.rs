//! Auth middleware: runs the configured [`crate::auth::Authenticator`] and
//! injects the resolved [`Caller`] as a request extension, or rejects with
//! 401. Grounded on the teacher's `client_auth.rs` extension-injection
//! pattern.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

pub async fn auth_middleware(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.auth.authenticate(header) {
        Ok(caller) => {
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(_) => {
            let mut response = (StatusCode::UNAUTHORIZED, "missing or invalid credentials").into_response();
            response.headers_mut().insert(
                "www-authenticate",
                HeaderValue::from_static("Bearer realm=\"gateway\""),
            );
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Caller;
    use axum::{body::Body, routing::get, Extension, Router};
    use std::collections::HashSet;
    use tower::ServiceExt;

    async fn state(enabled: bool, keys: &[&str]) -> Arc<AppState> {
        let mut config_keys = HashSet::new();
        for k in keys {
            config_keys.insert(k.to_string());
        }
        let mut config = crate::config::Config::from_env().unwrap_or_else(|_| panic!("env base"));
        config.enable_auth = enabled;
        config.api_keys = config_keys;
        crate::state::AppState::new(config, Arc::new(crate::kernel::EchoKernel)).await.unwrap()
    }

    async fn handler(Extension(caller): Extension<Caller>) -> String {
        caller.id
    }

    #[tokio::test]
    async fn rejects_missing_credentials_when_enabled() {
        std::env::set_var("ENABLE_AUTH", "false");
        let app_state = state(true, &["vista_key"]).await;
        let app = Router::new()
            .route("/", get(handler))
            .layer(axum::middleware::from_fn_with_state(app_state.clone(), auth_middleware))
            .with_state(app_state);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        std::env::remove_var("ENABLE_AUTH");
    }

    #[tokio::test]
    async fn accepts_valid_key() {
        std::env::set_var("ENABLE_AUTH", "false");
        let app_state = state(true, &["vista_key"]).await;
        let app = Router::new()
            .route("/", get(handler))
            .layer(axum::middleware::from_fn_with_state(app_state.clone(), auth_middleware))
            .with_state(app_state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .header("authorization", "Bearer vista_key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        std::env::remove_var("ENABLE_AUTH");
    }
}
