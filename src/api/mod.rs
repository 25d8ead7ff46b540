//! HTTP API server for voice-chatter

mod auth;
pub mod health;
pub mod rate_limit;
pub mod voice;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::{ServerConfig, SpeechConfig};
use crate::services::{RecognitionConfig, Services};
use crate::session::{GenerationFailurePolicy, ResponsePipeline};

/// Error body shared by every HTTP endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct Detail {
    pub detail: String,
}

/// Build a `{"detail": ...}` response
pub fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(Detail {
            detail: message.into(),
        }),
    )
        .into_response()
}

/// Shared state for API handlers
pub struct ApiState {
    pub api_token: SecretString,
    pub services: Services,
    pub pipeline: ResponsePipeline,
    pub recognition: RecognitionConfig,
    pub stream_idle_timeout: Duration,
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
}

impl ApiState {
    /// Whether `presented` is the shared device token
    #[must_use]
    pub fn token_matches(&self, presented: Option<&str>) -> bool {
        presented.is_some_and(|token| token == self.api_token.expose_secret())
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    api_token: SecretString,
    services: Services,
    port: u16,
    speech: SpeechConfig,
    policy: GenerationFailurePolicy,
    stream_idle_timeout: Duration,
    requests_per_minute: Option<u32>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(api_token: SecretString, services: Services) -> Self {
        Self {
            api_token,
            services,
            port: 8080,
            speech: SpeechConfig::default(),
            policy: GenerationFailurePolicy::default(),
            stream_idle_timeout: Duration::from_secs(30),
            requests_per_minute: None,
        }
    }

    /// Take every setting from a loaded server configuration
    #[must_use]
    pub fn from_config(config: &ServerConfig, services: Services) -> Self {
        Self::new(
            SecretString::from(config.api_token.expose_secret().to_owned()),
            services,
        )
        .port(config.port)
        .speech(config.speech.clone())
        .generation_failure_policy(config.on_generation_failure)
        .stream_idle_timeout(config.stream_idle_timeout)
        .requests_per_minute(config.requests_per_minute)
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set recognition and synthesis voice settings
    #[must_use]
    pub fn speech(mut self, speech: SpeechConfig) -> Self {
        self.speech = speech;
        self
    }

    #[must_use]
    pub const fn generation_failure_policy(mut self, policy: GenerationFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set how long a streaming session may stay silent
    #[must_use]
    pub const fn stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Enable the global rate limiter
    #[must_use]
    pub const fn requests_per_minute(mut self, rpm: Option<u32>) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let pipeline = ResponsePipeline::new(&self.services, self.speech.voice_params(), self.policy);

        let state = Arc::new(ApiState {
            api_token: self.api_token,
            recognition: self.speech.recognition(),
            services: self.services,
            pipeline,
            stream_idle_timeout: self.stream_idle_timeout,
            rate_limiter: self.requests_per_minute.map(rate_limit::create_limiter),
        });

        ApiServer {
            state,
            port: self.port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        Arc::clone(&self.state)
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(websocket::router(self.state.clone()))
            .merge(voice::router(self.state.clone()))
            .merge(health::router(self.state.clone()));

        let router = router.layer(axum::middleware::from_fn_with_state(
            self.state.clone(),
            rate_limit::rate_limit_middleware,
        ));

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server fails
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            %addr,
            services = %self.state.services.describe(),
            policy = ?self.state.pipeline.policy(),
            "API server listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }

    /// Bind the configured port and run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;
        self.serve(listener).await
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
