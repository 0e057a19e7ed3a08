//! Environment-driven server configuration
//!
//! All configuration is read once at process start. The master secret is
//! the only value with a development fallback; everything else either has
//! a safe default or is optional.

use crate::error::ConfigError;
use tracing::warn;

/// Development fallback master secret. Never used when
/// `MILKGATE_MASTER_SECRET` is set.
const DEV_MASTER_SECRET: &str = "milkgate-dev-master-secret-do-not-deploy";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Externally visible base URL, used in discovery metadata and the
    /// `WWW-Authenticate` realm. No trailing slash.
    pub server_url: String,
    /// Master secret for at-rest credential encryption
    pub master_secret: String,
    /// Path to the persistent bearer database. `None` selects the
    /// in-memory bearer store.
    pub bearer_db_path: Option<String>,
    /// Path to the credential database
    pub credential_db_path: String,
    /// Upstream service-account API key (single-tenant mode)
    pub upstream_api_key: Option<String>,
    /// Upstream service-account shared secret (single-tenant mode)
    pub upstream_api_secret: Option<String>,
    /// Loopback port for the optional callback listener
    pub callback_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            server_url: "http://localhost:8080".to_string(),
            master_secret: DEV_MASTER_SECRET.to_string(),
            bearer_db_path: None,
            credential_db_path: "milkgate-credentials.db".to_string(),
            upstream_api_key: None,
            upstream_api_secret: None,
            callback_port: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// Fails fast on malformed values; warns (but proceeds) when the
    /// development master secret is in use.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("MILKGATE_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("MILKGATE_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidVar {
                var: "MILKGATE_PORT",
                reason: format!("not a port number: {port}"),
            })?;
        }
        config.server_url = match std::env::var("MILKGATE_SERVER_URL") {
            Ok(url) => url.trim_end_matches('/').to_string(),
            Err(_) => format!("http://localhost:{}", config.port),
        };
        match std::env::var("MILKGATE_MASTER_SECRET") {
            Ok(secret) if !secret.is_empty() => config.master_secret = secret,
            _ => warn!("MILKGATE_MASTER_SECRET not set; using development fallback"),
        }
        config.bearer_db_path = std::env::var("MILKGATE_BEARER_DB").ok();
        if let Ok(path) = std::env::var("MILKGATE_CREDENTIAL_DB") {
            config.credential_db_path = path;
        }
        config.upstream_api_key = std::env::var("RTM_API_KEY").ok();
        config.upstream_api_secret = std::env::var("RTM_API_SECRET").ok();
        if let Ok(port) = std::env::var("MILKGATE_CALLBACK_PORT") {
            config.callback_port = Some(port.parse().map_err(|_| ConfigError::InvalidVar {
                var: "MILKGATE_CALLBACK_PORT",
                reason: format!("not a port number: {port}"),
            })?);
        }

        // Single-tenant mode needs both halves of the service account.
        if config.upstream_api_key.is_some() != config.upstream_api_secret.is_some() {
            return Err(ConfigError::InvalidVar {
                var: "RTM_API_KEY",
                reason: "RTM_API_KEY and RTM_API_SECRET must be set together".to_string(),
            });
        }

        Ok(config)
    }

    /// The protected-resource identifier advertised in discovery metadata.
    pub fn resource_url(&self) -> String {
        format!("{}/mcp", self.server_url)
    }

    /// Whether the process is using the development master secret.
    pub fn is_dev_secret(&self) -> bool {
        self.master_secret == DEV_MASTER_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.resource_url(), "http://localhost:8080/mcp");
        assert!(config.is_dev_secret());
        assert!(config.bearer_db_path.is_none());
    }

    #[test]
    fn test_resource_url_has_no_double_slash() {
        let config = ServerConfig {
            server_url: "https://milkgate.example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(config.resource_url(), "https://milkgate.example.com/mcp");
    }
}
