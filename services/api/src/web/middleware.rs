//! services/api/src/web/middleware.rs
//!
//! Identity middleware for the learner-scoped routes.

use axum::{extract::Request, middleware::Next, response::Response};
use course_progress_core::CoreError;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;

/// The header carrying the signed-in user's id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's identity, available to handlers as an `Extension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

/// Middleware that reads the user id header and inserts a `CurrentUser` into
/// the request extensions. Missing or malformed ids are rejected with 401.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| {
            debug!(path = %req.uri().path(), "Rejecting request without a valid user id");
            ApiError::Core(CoreError::NotAuthenticated)
        })?;

    req.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(req).await)
}
