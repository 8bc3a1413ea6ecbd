//! Edge admission: API-key check, user-key resolution, admin-token gate.
//!
//! The sync core consumes an already-validated user key; this module is the
//! collaborator that validates it. Resolution also bumps the user's request
//! counter, which reset must preserve.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use frkb_engine::{SyncError, SyncResult};
use frkb_store::{UserDirectory, UserKey};

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Parses the raw user key, resolves it against the directory, rejects
/// unknown or revoked keys and counts the admitted request.
pub fn admit_user(directory: &Arc<dyn UserDirectory>, raw: &str) -> SyncResult<UserKey> {
    let user = UserKey::parse(raw).map_err(|_| SyncError::InvalidUserKey {
        value: raw.to_string(),
    })?;
    let record = directory
        .resolve(&user)?
        .ok_or(SyncError::UserKeyNotFound)?;
    if !record.is_active {
        return Err(SyncError::UserKeyInactive);
    }
    if let Err(err) = directory.record_request(&user) {
        warn!(user = %user.short(), error = %err, "request counter bump failed");
    }
    Ok(user)
}

/// Checks the `x-api-key` header against the configured key set. An empty
/// key set admits everyone (development mode).
pub fn api_key_admitted(api_keys: &[String], presented: Option<&str>) -> bool {
    if api_keys.is_empty() {
        return true;
    }
    match presented {
        Some(presented) => api_keys.iter().any(|key| constant_time_eq(key, presented)),
        None => false,
    }
}

/// Middleware enforcing the API-key check on the sync routes.
pub async fn api_key_middleware(
    axum::extract::State(state): axum::extract::State<Arc<crate::api::SyncApi>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    if !api_key_admitted(&state.config.api_keys, presented) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

/// Middleware gating the admin routes behind `x-admin-token`. A missing
/// configured token disables the admin surface entirely.
pub async fn admin_token_middleware(
    axum::extract::State(state): axum::extract::State<Arc<crate::api::SyncApi>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(StatusCode::FORBIDDEN);
    };
    let presented = request
        .headers()
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok());
    match presented {
        Some(token) if constant_time_eq(expected, token) => Ok(next.run(request).await),
        _ => Err(StatusCode::FORBIDDEN),
    }
}
