use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::auth::looks_like_token;
use crate::model::UserInfo;
use crate::observability::AUTH_FAILURES_TOTAL;

use super::{ApiError, AppState};

/// The authenticated user behind a request, resolved from
/// `Authorization: Token <key>` (or `Bearer <key>`).
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: UserInfo,
    pub token: String,
}

/// Pull the key out of an Authorization header value.
pub fn parse_authorization(header: &str) -> Option<&str> {
    let (scheme, key) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let key = key.trim();
    looks_like_token(key).then_some(key)
}

fn reject(parts: &Parts, reason: &'static str) -> ApiError {
    metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
    tracing::debug!(uri = %parts.uri, "auth rejected: {reason}");
    ApiError::Unauthorized("authentication credentials were not provided or are invalid".into())
}

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(principal.clone());
        }

        let Some(header) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
        else {
            return Err(reject(parts, "missing authorization header"));
        };
        let Some(token) = parse_authorization(header) else {
            return Err(reject(parts, "malformed authorization header"));
        };
        let Some(user) = state.engine.authenticate(token) else {
            return Err(reject(parts, "unknown token"));
        };

        let principal = Principal { user, token: token.to_owned() };
        parts.extensions.insert(principal.clone());
        Ok(principal)
    }
}
