use thiserror::Error;

/// Facade-level errors
///
/// Handlers translate these at the HTTP boundary; nothing here panics out
/// to the transport. The OAuth-shaped variants carry the canonical
/// `error` code used in token-endpoint JSON bodies.
#[derive(Error, Debug)]
pub enum FacadeError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("authorization pending: user has not yet granted access upstream")]
    AuthorizationPending,

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("upstream error {code}: {msg}")]
    Upstream { code: i64, msg: String },

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl FacadeError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn invalid_grant(msg: impl Into<String>) -> Self {
        Self::InvalidGrant(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Canonical OAuth error code for token-endpoint JSON bodies
    pub fn oauth_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_request",
            Self::Unauthorized => "invalid_token",
            Self::AuthorizationPending => "authorization_pending",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::Upstream { .. } => "invalid_request",
            Self::UpstreamUnavailable => "temporarily_unavailable",
            Self::Internal(_) => "server_error",
        }
    }

    /// HTTP status the boundary translates this error to
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::UpstreamUnavailable => 502,
            Self::Internal(_) => 500,
            _ => 400,
        }
    }
}

/// Startup configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_codes() {
        assert_eq!(
            FacadeError::UnsupportedGrantType("implicit".into()).oauth_code(),
            "unsupported_grant_type"
        );
        assert_eq!(
            FacadeError::invalid_grant("unknown code").oauth_code(),
            "invalid_grant"
        );
        assert_eq!(
            FacadeError::AuthorizationPending.oauth_code(),
            "authorization_pending"
        );
    }

    #[test]
    fn test_display_includes_upstream_code() {
        let err = FacadeError::Upstream {
            code: 98,
            msg: "Login failed / Invalid auth token".into(),
        };
        assert!(err.to_string().contains("98"));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(FacadeError::Unauthorized.http_status(), 401);
        assert_eq!(FacadeError::UpstreamUnavailable.http_status(), 502);
        assert_eq!(FacadeError::internal("boom").http_status(), 500);
        assert_eq!(FacadeError::invalid_grant("nope").http_status(), 400);
        assert_eq!(FacadeError::AuthorizationPending.http_status(), 400);
    }
}
