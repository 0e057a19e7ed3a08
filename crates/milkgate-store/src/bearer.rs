//! Bearer → upstream-token stores
//!
//! The facade mints opaque UUID bearers; this module maps them to the
//! upstream auth token they stand in for. Two variants share the
//! [`BearerStore`] trait: an in-memory map with a hard TTL, and a SQLite
//! table that keeps bearers while they stay in use. Startup picks one
//! from configuration.

use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Default lifetime of an in-memory bearer
const MEMORY_TTL: Duration = Duration::from_secs(3600);
/// Sweep interval for the in-memory store
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Persistent bearers idle longer than this are removed
const PERSISTENT_MAX_IDLE: Duration = Duration::from_secs(24 * 3600);
/// Sweep interval for the persistent store
const PERSISTENT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Opaque bearer → upstream token mapping
#[async_trait]
pub trait BearerStore: Send + Sync {
    async fn store(&self, token: &str, api_key: &str) -> StoreResult<()>;

    /// Returns the mapped upstream token, or `None` for unknown or
    /// expired bearers.
    async fn get(&self, token: &str) -> Option<String>;

    async fn delete(&self, token: &str) -> StoreResult<()>;
}

struct MemoryEntry {
    api_key: String,
    expires_at: Instant,
}

/// In-memory bearer store with a fixed TTL
pub struct MemoryBearerStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
    ttl: Duration,
}

impl MemoryBearerStore {
    pub fn new() -> Self {
        Self::with_ttl(MEMORY_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Start the background sweep that drops expired entries every five
    /// minutes. Expiry is also enforced on read, so the sweep only bounds
    /// memory.
    pub fn spawn_sweeper(&self) {
        let entries = self.entries.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MEMORY_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let mut entries = entries.write().await;
                let before = entries.len();
                let now = Instant::now();
                entries.retain(|_, entry| entry.expires_at > now);
                let removed = before - entries.len();
                if removed > 0 {
                    debug!(removed, "swept expired bearers");
                }
            }
        });
    }
}

impl Default for MemoryBearerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BearerStore for MemoryBearerStore {
    async fn store(&self, token: &str, api_key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            token.to_string(),
            MemoryEntry {
                api_key: api_key.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, token: &str) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(token)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.api_key.clone())
    }

    async fn delete(&self, token: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(token);
        Ok(())
    }
}

const BEARER_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bearers (
    token      TEXT PRIMARY KEY,
    api_key    TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_used  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bearers_api_key ON bearers(api_key);
CREATE INDEX IF NOT EXISTS idx_bearers_last_used ON bearers(last_used);
";

/// SQLite-backed bearer store
///
/// Bearers persist across restarts; a row lives while it keeps being
/// used and is swept once idle past 24 hours. `get` refreshes
/// `last_used` on a detached task so the read path never waits on the
/// write.
pub struct PersistentBearerStore {
    conn: Arc<Mutex<Connection>>,
    max_idle: Duration,
}

impl PersistentBearerStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(BEARER_SCHEMA)?;
        info!("persistent bearer store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_idle: PERSISTENT_MAX_IDLE,
        })
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Hourly sweep of bearers idle past `max_idle`.
    pub fn spawn_sweeper(&self) {
        let conn = self.conn.clone();
        let max_idle = self.max_idle;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PERSISTENT_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let cutoff = unix_now() - max_idle.as_secs() as i64;
                let conn = conn.lock().await;
                match conn.execute("DELETE FROM bearers WHERE last_used < ?1", params![cutoff]) {
                    Ok(removed) if removed > 0 => debug!(removed, "swept idle bearers"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "bearer sweep failed"),
                }
            }
        });
    }

    /// Idle-sweep pass, exposed for tests.
    pub async fn sweep_idle(&self) -> StoreResult<usize> {
        let cutoff = unix_now() - self.max_idle.as_secs() as i64;
        let conn = self.conn.lock().await;
        Ok(conn.execute("DELETE FROM bearers WHERE last_used < ?1", params![cutoff])?)
    }
}

#[async_trait]
impl BearerStore for PersistentBearerStore {
    async fn store(&self, token: &str, api_key: &str) -> StoreResult<()> {
        let now = unix_now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO bearers (token, api_key, created_at, last_used)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(token) DO UPDATE SET api_key = excluded.api_key, last_used = excluded.last_used",
            params![token, api_key, now],
        )?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Option<String> {
        let api_key: Option<String> = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT api_key FROM bearers WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten()
        };

        if api_key.is_some() {
            // Refresh last_used off the read path.
            let conn = self.conn.clone();
            let token = token.to_string();
            tokio::spawn(async move {
                let conn = conn.lock().await;
                let _ = conn.execute(
                    "UPDATE bearers SET last_used = ?1 WHERE token = ?2",
                    params![unix_now(), token],
                );
            });
        }
        api_key
    }

    async fn delete(&self, token: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM bearers WHERE token = ?1", params![token])?;
        Ok(())
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
