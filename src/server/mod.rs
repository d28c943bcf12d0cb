// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Proxy server
//!
//! Thin HTTP handlers that keep provider keys off the client.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check and configured providers
//! - `POST /chat` - Role-aware chat completion
//! - `POST /send-email` - Transactional email
//! - `POST /translate` - Text translation
//! - `POST /verify-email` - Check a one-time email code
//! - `POST /verify-email/issue` - Issue a one-time email code
//! - `POST /passkey/register-challenge` - Passkey registration options
//! - `POST /passkey/authenticate-challenge` - Passkey authentication options
//!
//! Every endpoint answers CORS pre-flight requests and returns JSON.
//!
//! # Example
//!
//! ```no_run
//! use campusgate::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = Server::new(8787);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod email;
pub mod passkey;
pub mod store;
pub mod translate;

use anyhow::{anyhow, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::cloud::mail::MailClient;
use crate::cloud::translate::TranslateClient;
use crate::cloud::{OpenRouterClient, ProviderError};
use crate::config::AppConfig;
use crate::errors::{ApiResult, UserError};
use crate::security::RateLimiter;
use store::ProxyStore;

/// Maximum request body size (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// How often expired codes and challenges are dropped.
const PURGE_INTERVAL_SECS: u64 = 60;

/// Server state shared across handlers.
pub struct AppState {
    /// Chat provider, absent when no OpenRouter key is configured.
    pub chat: Option<OpenRouterClient>,
    pub chat_model: String,
    /// Mail provider, absent in log-only mode.
    pub mail: Option<MailClient>,
    pub email_from: String,
    /// Translation provider, absent in echo mode.
    pub translate: Option<TranslateClient>,
    pub store: ProxyStore,
    /// Wrong-code guesses per email for `/verify-email`.
    pub verify_limiter: RateLimiter,
    pub rp_id: String,
    pub rp_name: String,
}

/// Build an optional provider client, logging why it is unavailable.
fn optional_client<T>(built: Option<Result<T, ProviderError>>, name: &str) -> Option<T> {
    match built {
        Some(Ok(client)) => Some(client),
        Some(Err(e)) => {
            tracing::warn!(provider = name, "provider disabled: {}", e);
            None
        }
        None => {
            tracing::info!(provider = name, "no key configured, provider disabled");
            None
        }
    }
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Self {
        let providers = &config.providers;
        Self {
            chat: optional_client(
                providers
                    .openrouter_key
                    .as_deref()
                    .map(OpenRouterClient::with_api_key),
                "chat",
            ),
            chat_model: providers.chat_model.clone(),
            mail: optional_client(providers.resend_key.as_deref().map(MailClient::new), "email"),
            email_from: providers.email_from.clone(),
            translate: optional_client(
                providers.translate_key.as_deref().map(TranslateClient::new),
                "translate",
            ),
            store: ProxyStore::new(),
            verify_limiter: RateLimiter::new(config.rate_limit),
            rp_id: config.server.rp_id.clone(),
            rp_name: config.server.rp_name.clone(),
        }
    }
}

/// Unwrap a JSON body, turning extractor rejections into 400s.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        UserError::invalid_request(
            "Request body must be valid JSON",
            None,
            Some(&rejection.body_text()),
        )
    })
}

/// A field that must be present and non-blank.
pub(crate) fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(UserError::missing_field(field)),
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Routes with CORS, timeout and body limit, without per-IP throttling.
pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat::chat))
        .route("/send-email", post(email::send_email))
        .route("/verify-email", post(email::verify_email))
        .route("/verify-email/issue", post(email::issue_code))
        .route("/translate", post(translate::translate))
        .route("/passkey/register-challenge", post(passkey::register_challenge))
        .route(
            "/passkey/authenticate-challenge",
            post(passkey::authenticate_challenge),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors_layer())
        .with_state(state)
}

/// Proxy server.
pub struct Server {
    config: AppConfig,
}

impl Default for Server {
    fn default() -> Self {
        Self::from_config(AppConfig::default())
    }
}

impl Server {
    /// Create a server with default settings on `port`.
    pub fn new(port: u16) -> Self {
        let mut config = AppConfig::default();
        config.server.port = port;
        Self { config }
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.config.server.bind_address = addr.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Build the full router, including per-IP rate limiting.
    pub fn build_router(&self, state: Arc<AppState>) -> Result<Router> {
        let server = &self.config.server;
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(server.per_second)
                .burst_size(server.burst_size)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .ok_or_else(|| {
                    anyhow!(
                        "Invalid rate limit: per_second and burst_size must be non-zero (got {} and {})",
                        server.per_second,
                        server.burst_size
                    )
                })?,
        );

        Ok(
            router(state, Duration::from_secs(server.request_timeout_secs)).layer(GovernorLayer {
                config: governor_conf,
            }),
        )
    }

    /// Start the server with graceful shutdown.
    pub async fn start(&self) -> Result<()> {
        let state = Arc::new(AppState::from_config(&self.config));
        let router = self.build_router(state.clone())?;
        let addr = format!("{}:{}", self.config.server.bind_address, self.port());

        tracing::info!("Starting server on {}", addr);

        if self.config.server.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the proxy to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow!(
                    "Port {} is already in use. Stop the other process or pick another port with --port",
                    self.port()
                )
            } else {
                anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        let purger = tokio::spawn(purge_loop(state));

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        purger.abort();
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.config.server.port
    }

    pub fn bind_address(&self) -> &str {
        &self.config.server.bind_address
    }
}

async fn purge_loop(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(PURGE_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let now = Utc::now();
        let removed =
            state.store.purge_expired_at(now) + state.verify_limiter.purge_expired_at(now);
        if removed > 0 {
            tracing::debug!(removed, "purged expired codes and challenges");
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub providers: ProviderStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub chat: bool,
    pub email: bool,
    pub translate: bool,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            providers: ProviderStatus {
                chat: state.chat.is_some(),
                email: state.mail.is_some(),
                translate: state.translate.is_some(),
            },
        }),
    )
}

/// Wait for SIGINT/SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!("failed to install signal handlers: {}", e);
                    std::future::pending::<()>().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    tracing::info!("Shutting down server");
}
