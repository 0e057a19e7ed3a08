use thiserror::Error;

/// Storage and encryption errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    /// Ciphertext shorter than the nonce, or authentication failed.
    /// Also raised when the master secret no longer matches.
    #[error("decryption failed: ciphertext corrupted or wrong master secret")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,

    #[error("storage encoding error: {source}")]
    Encoding {
        #[from]
        source: base64::DecodeError,
    },

    #[error("database error: {source}")]
    Database {
        #[from]
        source: rusqlite::Error,
    },
}
