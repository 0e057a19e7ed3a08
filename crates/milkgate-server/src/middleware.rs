//! Bearer enforcement for the protected resource
//!
//! Everything outside the public bypass set requires
//! `Authorization: Bearer <token>`; a valid bearer attaches the mapped
//! upstream auth token to the request as a typed extension.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::state::AppState;

/// Upstream auth token attached to authenticated requests.
///
/// Private to the facade: handlers receive it through
/// `axum::Extension`, nothing else can forge it into a request.
#[derive(Debug, Clone)]
pub struct UpstreamToken(pub String);

/// Paths that never require a bearer: the OAuth surface, discovery,
/// credential setup, and liveness.
pub(crate) fn is_bypass(path: &str) -> bool {
    path.starts_with("/oauth/")
        || path.starts_with("/.well-known/")
        || path == "/setup"
        || path.starts_with("/setup/")
        || path == "/health"
        || path.starts_with("/health/")
}

/// Axum middleware guarding the protected API path.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if is_bypass(request.uri().path()) {
        return next.run(request).await;
    }

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(bearer) = bearer else {
        debug!("request without bearer rejected");
        return challenge(&state, None);
    };

    match state.bearers.get(bearer).await {
        Some(upstream_token) => {
            request.extensions_mut().insert(UpstreamToken(upstream_token));
            next.run(request).await
        }
        None => {
            debug!("unknown or expired bearer rejected");
            challenge(&state, Some("invalid_token"))
        }
    }
}

fn challenge(state: &AppState, error: Option<&str>) -> Response {
    let realm = &state.config.server_url;
    let value = match error {
        Some(error) => format!(r#"Bearer realm="{realm}", error="{error}""#),
        None => format!(r#"Bearer realm="{realm}""#),
    };
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, value)],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_set() {
        assert!(is_bypass("/oauth/authorize"));
        assert!(is_bypass("/oauth/token"));
        assert!(is_bypass("/.well-known/oauth-authorization-server"));
        assert!(is_bypass("/setup"));
        assert!(is_bypass("/health"));

        assert!(!is_bypass("/mcp"));
        assert!(!is_bypass("/"));
        assert!(!is_bypass("/oauth")); // only paths *under* /oauth/
        assert!(!is_bypass("/mcp/extra"));
    }
}
