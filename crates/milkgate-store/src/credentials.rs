//! Encrypted-at-rest upstream credential store
//!
//! One row per user: the upstream API key and shared secret, each sealed
//! independently with [`SecretBox`]. The `updated_at` stamp is maintained
//! by a SQLite trigger so upserts cannot forget it.

use crate::crypto::SecretBox;
use crate::{StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS credentials (
    user_id     TEXT PRIMARY KEY,
    enc_api_key TEXT NOT NULL,
    enc_secret  TEXT NOT NULL,
    created_at  INTEGER NOT NULL DEFAULT (unixepoch()),
    updated_at  INTEGER NOT NULL DEFAULT (unixepoch())
);
CREATE TRIGGER IF NOT EXISTS credentials_touch
AFTER UPDATE ON credentials
BEGIN
    UPDATE credentials SET updated_at = unixepoch() WHERE user_id = NEW.user_id;
END;
";

/// User → encrypted upstream credential pair
pub struct CredentialStore {
    conn: Mutex<Connection>,
    secret_box: SecretBox,
}

impl CredentialStore {
    /// Open (or create) the credential database at `path`.
    pub fn open(path: impl AsRef<Path>, secret_box: SecretBox) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        info!("credential store ready");
        Ok(Self {
            conn: Mutex::new(conn),
            secret_box,
        })
    }

    /// In-memory store, used by tests and ephemeral deployments.
    pub fn open_in_memory(secret_box: SecretBox) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            secret_box,
        })
    }

    /// Encrypt and upsert a credential pair.
    pub async fn store(&self, user_id: &str, api_key: &str, api_secret: &str) -> StoreResult<()> {
        let enc_api_key = self.secret_box.seal(api_key)?;
        let enc_secret = self.secret_box.seal(api_secret)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO credentials (user_id, enc_api_key, enc_secret)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 enc_api_key = excluded.enc_api_key,
                 enc_secret  = excluded.enc_secret",
            params![user_id, enc_api_key, enc_secret],
        )?;
        Ok(())
    }

    /// Decrypt and return the credential pair for `user_id`.
    pub async fn retrieve(&self, user_id: &str) -> StoreResult<(String, String)> {
        let row: Option<(String, String)> = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT enc_api_key, enc_secret FROM credentials WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };
        let (enc_api_key, enc_secret) = row.ok_or(StoreError::NotFound)?;
        Ok((
            self.secret_box.open(&enc_api_key)?,
            self.secret_box.open(&enc_secret)?,
        ))
    }

    pub async fn delete(&self, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM credentials WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }

    /// Checkpoint the WAL into the main database file. Tests use this
    /// before inspecting raw file contents.
    pub async fn checkpoint(&self) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        // wal_checkpoint returns a result row, so query_row rather than execute.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}
