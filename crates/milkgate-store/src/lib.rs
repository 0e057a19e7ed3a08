//! # Milkgate Store
//!
//! Durable state for the Milkgate OAuth facade:
//!
//! - **[`crypto`]**: AES-256-GCM sealing with a key derived from the
//!   process-wide master secret
//! - **[`credentials`]**: encrypted-at-rest mapping of user → upstream
//!   API key/secret pair
//! - **[`bearer`]**: bearer → upstream-token mapping, with an in-memory
//!   TTL variant and a persistent SQLite variant chosen at startup
//!
//! Plaintext upstream credentials never reach persistent storage; the
//! credential tables hold only base64-encoded `nonce || ciphertext`.

pub mod bearer;
pub mod credentials;
pub mod crypto;
pub mod error;

pub use bearer::{BearerStore, MemoryBearerStore, PersistentBearerStore};
pub use credentials::CredentialStore;
pub use crypto::SecretBox;
pub use error::StoreError;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
