//! Pending-authorization sessions
//!
//! One [`AuthSession`] per in-flight authorization, keyed by the fake
//! OAuth code handed to the client. The table serializes the frob
//! exchange per session and enforces the single-use code: `/token`
//! consumes a session by removing it, and removal happens before the
//! token response is written.
//!
//! Locking discipline: the table lock is never held across an upstream
//! HTTP call. Callers take an [`ExchangeTicket`], perform the exchange
//! with the copied-out frob, then report back via `finish_exchange`,
//! which rechecks that the session still exists.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Sessions expire when the upstream frob does
const SESSION_TTL: Duration = Duration::from_secs(3600);
/// Expiry sweep cadence
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One in-flight authorization
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Fake OAuth code, opaque to the client
    pub code: String,
    /// Upstream token-request handle
    pub frob: String,
    /// Client's CSRF state, echoed on the redirect
    pub state: String,
    pub redirect_uri: String,
    pub client_id: String,
    /// RFC 8707 audience, when the client presented one
    pub resource: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// Credential input from the authorize form, if any
    pub api_key_hint: Option<String>,
    /// Upstream auth token, set after a successful exchange
    pub token: Option<String>,
}

struct SessionSlot {
    session: AuthSession,
    created_at: Instant,
    /// Serializes the frob exchange: at most one in flight per session.
    exchange_in_flight: bool,
}

/// Outcome of `begin_exchange`
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeTicket {
    /// Session unknown or expired
    NotFound,
    /// Token already present; no exchange needed
    AlreadyAuthorized,
    /// Another exchange is in flight; report pending
    Busy,
    /// Proceed: exchange this frob, then call `finish_exchange`
    Ready(String),
}

/// In-memory store of pending authorizations keyed by code
pub struct AuthSessionTable {
    slots: RwLock<HashMap<String, SessionSlot>>,
    ttl: Duration,
}

impl AuthSessionTable {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn insert(&self, session: AuthSession) {
        let mut slots = self.slots.write().await;
        slots.insert(
            session.code.clone(),
            SessionSlot {
                session,
                created_at: Instant::now(),
                exchange_in_flight: false,
            },
        );
    }

    /// Snapshot a session by code.
    pub async fn get(&self, code: &str) -> Option<AuthSession> {
        let slots = self.slots.read().await;
        slots
            .get(code)
            .filter(|slot| !self.is_expired(slot))
            .map(|slot| slot.session.clone())
    }

    /// Claim the right to exchange this session's frob.
    pub async fn begin_exchange(&self, code: &str) -> ExchangeTicket {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(code) else {
            return ExchangeTicket::NotFound;
        };
        if slot.created_at.elapsed() >= self.ttl {
            slots.remove(code);
            return ExchangeTicket::NotFound;
        }
        if slot.session.token.is_some() {
            return ExchangeTicket::AlreadyAuthorized;
        }
        if slot.exchange_in_flight {
            return ExchangeTicket::Busy;
        }
        slot.exchange_in_flight = true;
        ExchangeTicket::Ready(slot.session.frob.clone())
    }

    /// Record the exchange result. The session may have been consumed or
    /// swept while the upstream call ran; that is not an error.
    pub async fn finish_exchange(&self, code: &str, token: Option<String>) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(code) {
            slot.exchange_in_flight = false;
            if let Some(token) = token {
                slot.session.token = Some(token);
            }
        }
    }

    /// Remove and return a session. This is the single-use gate: of two
    /// concurrent `/token` requests, only one take succeeds.
    pub async fn take(&self, code: &str) -> Option<AuthSession> {
        let mut slots = self.slots.write().await;
        let slot = slots.remove(code)?;
        if self.is_expired(&slot) {
            return None;
        }
        Some(slot.session)
    }

    /// Drop sessions older than the TTL. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| slot.created_at.elapsed() < self.ttl);
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, "swept expired auth sessions");
        }
        removed
    }

    /// Start the minutely expiry sweep.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>) {
        let table = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                table.sweep().await;
            }
        });
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    fn is_expired(&self, slot: &SessionSlot) -> bool {
        slot.created_at.elapsed() >= self.ttl
    }
}

impl Default for AuthSessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(code: &str) -> AuthSession {
        AuthSession {
            code: code.to_string(),
            frob: "F1".to_string(),
            state: "S1".to_string(),
            redirect_uri: "http://app/cb".to_string(),
            client_id: "client-1".to_string(),
            resource: None,
            code_challenge: None,
            code_challenge_method: None,
            api_key_hint: None,
            token: None,
        }
    }

    #[tokio::test]
    async fn test_insert_get_take() {
        let table = AuthSessionTable::new();
        table.insert(session("code-1")).await;

        assert_eq!(table.get("code-1").await.unwrap().frob, "F1");
        assert!(table.get("code-2").await.is_none());

        let taken = table.take("code-1").await.unwrap();
        assert_eq!(taken.code, "code-1");
        // Codes are single-use.
        assert!(table.take("code-1").await.is_none());
        assert!(table.get("code-1").await.is_none());
    }

    #[tokio::test]
    async fn test_exchange_serialization() {
        let table = AuthSessionTable::new();
        table.insert(session("code-1")).await;

        let first = table.begin_exchange("code-1").await;
        assert_eq!(first, ExchangeTicket::Ready("F1".to_string()));

        // Second claim while the first is in flight reports busy.
        assert_eq!(table.begin_exchange("code-1").await, ExchangeTicket::Busy);

        // Pending outcome releases the claim without a token.
        table.finish_exchange("code-1", None).await;
        assert_eq!(
            table.begin_exchange("code-1").await,
            ExchangeTicket::Ready("F1".to_string())
        );

        table.finish_exchange("code-1", Some("T-upstream".to_string())).await;
        assert_eq!(
            table.begin_exchange("code-1").await,
            ExchangeTicket::AlreadyAuthorized
        );
        assert_eq!(
            table.get("code-1").await.unwrap().token.as_deref(),
            Some("T-upstream")
        );
    }

    #[tokio::test]
    async fn test_finish_after_take_is_harmless() {
        let table = AuthSessionTable::new();
        table.insert(session("code-1")).await;
        assert!(matches!(
            table.begin_exchange("code-1").await,
            ExchangeTicket::Ready(_)
        ));
        table.take("code-1").await.unwrap();
        // Session was consumed while the upstream call ran.
        table.finish_exchange("code-1", Some("T-upstream".to_string())).await;
        assert!(table.get("code-1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_sweep() {
        let table = AuthSessionTable::new();
        table.insert(session("code-1")).await;

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert!(table.get("code-1").await.is_none());
        assert_eq!(table.begin_exchange("code-1").await, ExchangeTicket::NotFound);

        table.insert(session("code-2")).await;
        tokio::time::advance(Duration::from_secs(1800)).await;
        table.insert(session("code-3")).await;
        tokio::time::advance(Duration::from_secs(1801)).await;

        let removed = table.sweep().await;
        assert_eq!(removed, 1);
        assert_eq!(table.len().await, 1);
        assert!(table.get("code-3").await.is_some());
    }
}
