//! Health and device provisioning checks

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::{ApiState, detail};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Serialize)]
struct AuthCheckResponse {
    status: &'static str,
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth-check", get(auth_check).post(auth_check))
        .with_state(state)
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Lets a device verify its token before it starts talking
async fn auth_check(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TokenQuery>,
) -> Response {
    if state.token_matches(query.token.as_deref()) {
        Json(AuthCheckResponse {
            status: "authorized",
        })
        .into_response()
    } else {
        tracing::warn!("auth check rejected");
        detail(StatusCode::UNAUTHORIZED, "Invalid token")
    }
}
