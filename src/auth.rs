//! Bearer-token guard for admin routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::AppState;

/// Constant-time comparison so response timing leaks nothing about the token.
pub fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Middleware that requires `Authorization: Bearer <admin token>`.
/// With no token configured every request is rejected.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(ApiError::Unauthorized);
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .is_some_and(|token| token_matches(token.trim(), expected));

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "admin request rejected");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}
