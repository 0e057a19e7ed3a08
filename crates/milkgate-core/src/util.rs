//! Identifier generation utilities

use uuid::Uuid;

/// Generate an opaque authorization code.
///
/// Codes are single-use and opaque to clients; UUID v4 gives 122 bits of
/// entropy which is sufficient for a 60-minute lifetime.
pub fn generate_code() -> String {
    Uuid::new_v4().to_string()
}

/// Generate an opaque bearer token.
pub fn generate_bearer() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a one-time CSRF state token.
pub fn generate_csrf_token() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a session identifier for MCP connections.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a random alphanumeric secret of the given length.
///
/// Alphanumerics are a subset of the RFC 7636 unreserved set, so this
/// serves for PKCE code verifiers as well as client state strings.
pub fn random_alphanumeric(length: usize) -> String {
    use rand::distr::Alphanumeric;
    use rand::Rng;
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
