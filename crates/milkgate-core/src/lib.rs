//! # Milkgate Core
//!
//! Shared foundation for the Milkgate OAuth facade.
//!
//! Milkgate fronts the Remember The Milk (RTM) API — whose native
//! authentication is a non-standard three-legged "frob" exchange — with a
//! fully compliant OAuth 2.1 authorization server plus protected resource.
//! This crate holds the pieces every other Milkgate crate needs:
//!
//! - **[`error`]**: the facade-level error hierarchy and HTTP mapping hints
//! - **[`protocol`]**: JSON-RPC 2.0 types for the protected `/mcp` endpoint
//! - **[`config`]**: environment-driven server configuration
//! - **[`util`]**: identifier and secure-random generation
//!
//! ## Configuration
//!
//! ```rust
//! use milkgate_core::config::ServerConfig;
//!
//! let config = ServerConfig::default();
//! assert_eq!(config.port, 8080);
//! assert!(config.server_url.starts_with("http://"));
//! ```
//!
//! ## JSON-RPC
//!
//! ```rust
//! use milkgate_core::protocol::{JsonRpcRequest, JsonRpcResponse};
//!
//! let req: JsonRpcRequest =
//!     serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap();
//! assert_eq!(req.method, "ping");
//! let resp = JsonRpcResponse::success(serde_json::json!({}), req.id);
//! assert!(resp.error.is_none());
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod util;

pub use config::ServerConfig;
pub use error::{ConfigError, FacadeError};

/// Result type for facade-level operations
pub type FacadeResult<T> = Result<T, FacadeError>;
