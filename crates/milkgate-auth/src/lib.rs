//! # Milkgate Auth
//!
//! Authorization-flow plumbing for the Milkgate OAuth facade.
//!
//! The facade presents an OAuth 2.1 authorization server to external
//! clients while internally orchestrating the upstream frob handshake.
//! This crate owns the state that flow runs on:
//!
//! - **[`pkce`]**: S256 challenge generation and verification
//! - **[`csrf`]**: one-time, client-bound CSRF state tokens (10-minute TTL)
//! - **[`session`]**: the pending-authorization table keyed by the fake
//!   OAuth code, with the frob lifecycle and 60-minute expiry sweep
//! - **[`callback`]**: the optional loopback listener that accepts the
//!   redirect and signals a waiter
//! - **[`types`]**: discovery metadata, registration and token wire shapes
//! - **[`error`]**: the crate's [`AuthError`] hierarchy
//!
//! ## Session lifecycle
//!
//! ```text
//!                POST /authorize (ok)
//!                      │
//!                      ▼
//!                 AWAITING_USER ── 60 min ──► expired (swept)
//!                      │
//!         exchange 101 │ (pending) ──► stays AWAITING_USER
//!                      │
//!                      │ success ──► AUTHORIZED_HAS_TOKEN
//!                      ▼
//!               /token success ──► consumed (row removed)
//! ```

pub mod callback;
pub mod csrf;
pub mod error;
pub mod pkce;
pub mod session;
pub mod types;

pub use callback::CallbackServer;
pub use csrf::CsrfStateTable;
pub use error::{AuthError, AuthResult};
pub use pkce::{generate_pkce_params, verify_challenge, PkceParams};
pub use session::{AuthSession, AuthSessionTable, ExchangeTicket};
