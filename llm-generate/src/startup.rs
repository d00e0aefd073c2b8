//! Application startup and lifecycle management.
//!
//! A single HTTP server: `/health` for liveness checks, every other path goes to the
//! generation handler.

use crate::config::ProxyConfig;
use crate::error::panic_response;
use crate::handlers::{health_check, llm_generate};
use crate::middleware::cors_middleware;
use crate::services::{FirebaseTokenVerifier, GeminiClient, TokenVerifier};
use axum::{
    middleware::from_fn,
    routing::get,
    Router,
};
use secrecy::Secret;
use service_core::middleware::tracing::{http_request_span, request_id_middleware};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Wall-clock budget for one invocation, upstream call included.
pub const INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted request body, enforced after authentication.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state, resolved once at startup.
#[derive(Clone)]
pub struct AppState {
    pub api_key: Option<Secret<String>>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub gemini: GeminiClient,
}

impl AppState {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            verifier: Arc::new(FirebaseTokenVerifier::new(config.project_id.clone())),
            gemini: GeminiClient::new(),
        }
    }
}

pub fn build_router(state: AppState, max_concurrency: usize) -> Router {
    Router::new()
        .route("/health", get(health_check).fallback(llm_generate))
        .fallback(llm_generate)
        .with_state(state)
        .layer(TimeoutLayer::new(INVOCATION_TIMEOUT))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(ConcurrencyLimitLayer::new(max_concurrency.max(1)))
        .layer(from_fn(cors_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(http_request_span))
        .layer(from_fn(request_id_middleware))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ProxyConfig) -> std::io::Result<Self> {
        if config.api_key.is_none() {
            tracing::warn!("Gemini API key not configured; generation requests will fail");
        }
        if config.project_id.is_none() {
            tracing::warn!("Firebase project id not configured; every ID token will be rejected");
        }

        let state = AppState::from_config(&config);
        Self::with_state(config, state).await
    }

    /// Build around an existing state, e.g. with a substitute verifier.
    pub async fn with_state(config: ProxyConfig, state: AppState) -> std::io::Result<Self> {
        let address = config.common.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", address, e);
            e
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            max_concurrency = config.common.max_concurrency,
            "llm-generate listening"
        );

        Ok(Self {
            port,
            listener,
            router: build_router(state, config.common.max_concurrency),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until Ctrl+C or SIGTERM.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}
