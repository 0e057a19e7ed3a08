//! One-time CSRF state tokens
//!
//! Tokens are UUIDs bound to the requesting client, valid for ten
//! minutes, and consumed by their single successful validation. Expired
//! entries are swept opportunistically on every `generate`.

use milkgate_core::util::generate_csrf_token;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

const CSRF_TTL: Duration = Duration::from_secs(600);

struct CsrfEntry {
    client_id: String,
    expires_at: Instant,
}

/// In-memory table of outstanding CSRF state tokens
pub struct CsrfStateTable {
    entries: RwLock<HashMap<String, CsrfEntry>>,
    ttl: Duration,
}

impl CsrfStateTable {
    pub fn new() -> Self {
        Self::with_ttl(CSRF_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Mint a token bound to `client_id`, sweeping expired entries first.
    pub async fn generate(&self, client_id: &str) -> String {
        let token = generate_csrf_token();
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            token.clone(),
            CsrfEntry {
                client_id: client_id.to_string(),
                expires_at: now + self.ttl,
            },
        );
        token
    }

    /// Validate and consume a token. Succeeds at most once per token;
    /// fails on unknown tokens, expired tokens, and client mismatches.
    pub async fn validate(&self, token: &str, client_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get(token) else {
            debug!("csrf validation failed: unknown token");
            return false;
        };
        if entry.expires_at <= Instant::now() {
            entries.remove(token);
            debug!("csrf validation failed: expired");
            return false;
        }
        if entry.client_id != client_id {
            debug!("csrf validation failed: client mismatch");
            return false;
        }
        entries.remove(token);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for CsrfStateTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_succeeds_exactly_once() {
        let table = CsrfStateTable::new();
        let token = table.generate("client-1").await;
        assert!(table.validate(&token, "client-1").await);
        assert!(!table.validate(&token, "client-1").await);
    }

    #[tokio::test]
    async fn test_client_mismatch_always_fails() {
        let table = CsrfStateTable::new();
        let token = table.generate("client-1").await;
        assert!(!table.validate(&token, "client-2").await);
        // Mismatch does not consume the token.
        assert!(table.validate(&token, "client-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_fails() {
        let table = CsrfStateTable::new();
        let token = table.generate("client-1").await;
        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(!table.validate(&token, "client-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_sweeps_expired() {
        let table = CsrfStateTable::new();
        table.generate("client-1").await;
        table.generate("client-1").await;
        assert_eq!(table.len().await, 2);

        tokio::time::advance(Duration::from_secs(601)).await;
        table.generate("client-2").await;
        // Only the freshly generated token survives.
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_token_fails() {
        let table = CsrfStateTable::new();
        assert!(!table.validate("never-issued", "client-1").await);
    }
}
