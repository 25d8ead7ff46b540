//! Bearer token authentication middleware

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use super::{ApiState, detail};

/// Extract the token from an `Authorization: Bearer <token>` header
fn extract_bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware to verify the device token
///
/// Missing or malformed header is 401, a wrong token is 403.
pub async fn require_token(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    match extract_bearer(&req) {
        Some(token) if state.token_matches(Some(token)) => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("invalid device token provided");
            Err(detail(StatusCode::FORBIDDEN, "Invalid token"))
        }
        None => {
            tracing::debug!("no bearer token provided");
            Err(detail(
                StatusCode::UNAUTHORIZED,
                "Missing or invalid Authorization header",
            ))
        }
    }
}
