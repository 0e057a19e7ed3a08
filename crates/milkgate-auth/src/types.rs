//! Wire types for discovery, registration and the token endpoint

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Protected-resource metadata (RFC 9728)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
}

/// Authorization-server metadata (RFC 8414)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    /// Metadata for a facade rooted at `server_url` (no trailing slash).
    pub fn for_server(server_url: &str) -> Self {
        Self {
            issuer: server_url.to_string(),
            authorization_endpoint: format!("{server_url}/oauth/authorize"),
            token_endpoint: format!("{server_url}/oauth/token"),
            registration_endpoint: format!("{server_url}/oauth/register"),
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec!["authorization_code".to_string()],
            code_challenge_methods_supported: vec!["S256".to_string()],
        }
    }
}

/// Client registration request (RFC 7591). Any JSON body is accepted;
/// unrecognized members are retained but ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientRegistrationRequest {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Client registration response (RFC 7591)
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uris: Option<Vec<String>>,
    pub client_id_issued_at: u64,
    /// Zero: clients are not authenticated by secret at the token endpoint.
    pub client_secret_expires_at: u64,
}

/// Token endpoint success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// May be zero when the underlying credential does not expire.
    pub expires_in: u64,
}

impl TokenResponse {
    pub fn bearer(access_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

/// Token endpoint error body (RFC 6749 §5.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl TokenErrorResponse {
    pub fn new(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: Some(description.into()),
            error_uri: None,
        }
    }
}

/// `/oauth/check-auth` poll response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAuthResponse {
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckAuthResponse {
    pub fn authorized() -> Self {
        Self {
            authorized: true,
            pending: None,
            error: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            authorized: false,
            pending: Some(true),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authorized: false,
            pending: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_metadata_shape() {
        let metadata = AuthorizationServerMetadata::for_server("https://gate.example.com");
        let encoded = serde_json::to_value(&metadata).unwrap();
        assert_eq!(encoded["issuer"], "https://gate.example.com");
        assert_eq!(
            encoded["authorization_endpoint"],
            "https://gate.example.com/oauth/authorize"
        );
        assert_eq!(encoded["response_types_supported"], serde_json::json!(["code"]));
        assert_eq!(
            encoded["code_challenge_methods_supported"],
            serde_json::json!(["S256"])
        );
        // Exactly the advertised fields, nothing extra.
        assert_eq!(encoded.as_object().unwrap().len(), 7);
    }

    #[test]
    fn test_registration_accepts_any_json() {
        let req: ClientRegistrationRequest = serde_json::from_str(
            r#"{"client_name":"Inspector","redirect_uris":["http://app/cb"],"tos_uri":"x"}"#,
        )
        .unwrap();
        assert_eq!(req.client_name.as_deref(), Some("Inspector"));
        assert!(req.extra.contains_key("tos_uri"));

        let empty: ClientRegistrationRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.client_name.is_none());
    }

    #[test]
    fn test_check_auth_bodies() {
        let pending = serde_json::to_value(CheckAuthResponse::pending()).unwrap();
        assert_eq!(pending, serde_json::json!({"authorized": false, "pending": true}));

        let ok = serde_json::to_value(CheckAuthResponse::authorized()).unwrap();
        assert_eq!(ok, serde_json::json!({"authorized": true}));
    }

    #[test]
    fn test_token_error_shape() {
        let body = serde_json::to_value(TokenErrorResponse::new(
            "invalid_grant",
            "unknown authorization code",
        ))
        .unwrap();
        assert_eq!(body["error"], "invalid_grant");
        assert!(body.get("error_uri").is_none());
    }
}
