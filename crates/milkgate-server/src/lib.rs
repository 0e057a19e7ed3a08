//! # Milkgate Server
//!
//! The Milkgate OAuth facade: a compliant OAuth 2.1 authorization server
//! plus protected resource fronting the Remember The Milk API, whose
//! native authentication is a three-legged frob exchange.
//!
//! External clients (MCP hosts in particular) discover the endpoints,
//! optionally register, run the authorization-code flow with CSRF and
//! PKCE, and end up with an opaque bearer. Behind the scenes the facade
//! requests a frob, sends the user to the upstream grant page, polls the
//! exchange, and maps the minted bearer to the upstream auth token.
//! Requests to `/mcp` carrying a valid bearer are dispatched with that
//! upstream credential attached.
//!
//! Modules:
//!
//! - [`facade`]: discovery, `/oauth/*` endpoints, the session state machine
//! - [`middleware`]: bearer enforcement with the public bypass set
//! - [`setup`]: one-shot capture of a user's upstream key/secret pair
//! - [`tasks`]: progress/cancellation registry for batched operations
//! - [`mcp`]: the protected JSON-RPC dispatch
//! - [`router`]: assembles everything into one [`axum::Router`]

pub mod facade;
pub mod html;
pub mod mcp;
pub mod middleware;
pub mod router;
pub mod setup;
pub mod state;
pub mod tasks;

pub use router::build_router;
pub use state::{AppState, ProbeFactory, RtmProbeFactory};
pub use tasks::{ProgressNotification, Task, TaskManager, TaskStatus};
