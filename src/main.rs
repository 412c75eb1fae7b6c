use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{routing::get, Router};
use tokio::signal;
use tracing::info;

use llm_gateway::{api, config::Config, kernel, middleware, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_gateway=info,tower_http=warn".into()),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration from the environment")?;
    info!(port = config.server_port, tls = config.tls_enabled(), "llm-gateway starting");

    let state = AppState::new(config.clone(), Arc::new(kernel::EchoKernel)).await?;
    state.initialize().await;

    let client_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let client_listener = tokio::net::TcpListener::bind(client_addr).await?;
    info!(%client_addr, "client API listening");

    let trace_layer = || {
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };

    let client_app = api_router(Arc::clone(&state))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), middleware::auth_mw::auth_middleware))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), middleware::journal_mw::journal_middleware))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), middleware::rate_limit::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::security_headers::security_headers_middleware))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), middleware::security_headers::trusted_host_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(axum::middleware::from_fn(middleware::request_id::request_id_middleware))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), middleware::metrics_mw::metrics_middleware))
        .layer(trace_layer())
        .with_state(Arc::clone(&state));

    if state.config.enable_metrics {
        let metrics_addr: SocketAddr = format!("{}:{}", state.config.server_host, state.config.metrics_port).parse()?;
        let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
        info!(%metrics_addr, "metrics listening");
        let metrics_app = Router::new().route("/metrics", get(api::metrics_text)).with_state(Arc::clone(&state));

        tokio::select! {
            result = axum::serve(client_listener, client_app.into_make_service_with_connect_info::<SocketAddr>()) => {
                result.context("client API server error")?;
            }
            result = axum::serve(metrics_listener, metrics_app) => {
                result.context("metrics server error")?;
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received");
            }
        }
    } else {
        tokio::select! {
            result = axum::serve(client_listener, client_app.into_make_service_with_connect_info::<SocketAddr>()) => {
                result.context("client API server error")?;
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received");
            }
        }
    }

    Ok(())
}

/// Builds the routed handler tree. Middleware is layered on by the caller so
/// tests can mount this without the full production stack.
fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let prefix = state.config.api_prefix.clone();

    let api_routes = Router::new()
        .route("/health", get(api::health::health))
        .route("/models", get(api::models::list_models))
        .route("/models/memory/usage", get(api::models::memory_usage))
        .route("/models/{id}", get(api::models::get_model))
        .route("/models/{id}/load", axum::routing::post(api::models::load_model))
        .route("/models/{id}/unload", axum::routing::post(api::models::unload_model))
        .route("/chat/completions", axum::routing::post(api::chat::chat_completions))
        .route("/completions", axum::routing::post(api::completions::completions))
        .route("/sessions", axum::routing::post(api::sessions::create_session))
        .route(
            "/sessions/{id}",
            get(api::sessions::get_session).delete(api::sessions::delete_session),
        )
        .route("/sessions/{id}/messages", get(api::sessions::get_messages));

    Router::new()
        .route("/healthz", get(api::health::healthz))
        .nest(&prefix, api_routes)
}

fn cors_layer(allowed_origins: &[String]) -> tower_http::cors::CorsLayer {
    use tower_http::cors::{AllowOrigin, CorsLayer};

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(AllowOrigin::any()).allow_methods(tower_http::cors::Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(tower_http::cors::Any)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 200, 1 otherwise.
/// Invoked via `gateway --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("SERVER_PORT").ok().and_then(|v| v.parse::<u16>().ok()).unwrap_or(8555);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
