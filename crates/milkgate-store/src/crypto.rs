//! At-rest encryption for upstream credentials
//!
//! AES-256-GCM with the key derived as `SHA-256(master_secret)`. The
//! master secret is read once at process start and never exposed through
//! any public surface; this module only ever sees the derived key.

use crate::{StoreError, StoreResult};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

/// GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// Sealing/opening box bound to one derived key
///
/// Storage format: `base64(nonce || ciphertext || tag)`.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Derive the sealing key from the process master secret.
    pub fn from_master_secret(master_secret: &str) -> Self {
        let digest = Sha256::digest(master_secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a value for storage. A fresh random nonce is generated per
    /// call and prepended to the ciphertext.
    pub fn seal(&self, plaintext: &str) -> StoreResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| StoreError::Encrypt)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a stored value. Fails with [`StoreError::Decrypt`] when the
    /// payload is shorter than the nonce or authentication fails.
    pub fn open(&self, stored: &str) -> StoreResult<String> {
        let sealed = BASE64.decode(stored)?;
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::Decrypt);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| StoreError::Decrypt)
    }
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let secret_box = SecretBox::from_master_secret("test-master");
        for plaintext in ["api-key-value", "", "snowman \u{2603} bytes"] {
            let sealed = secret_box.seal(plaintext).unwrap();
            assert_eq!(secret_box.open(&sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_seal_is_randomized() {
        let secret_box = SecretBox::from_master_secret("test-master");
        let a = secret_box.seal("same input").unwrap();
        let b = secret_box.seal("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_rejects_truncated() {
        let secret_box = SecretBox::from_master_secret("test-master");
        let short = BASE64.encode([0u8; NONCE_LEN - 1]);
        assert!(matches!(secret_box.open(&short), Err(StoreError::Decrypt)));
    }

    #[test]
    fn test_open_rejects_tampering() {
        let secret_box = SecretBox::from_master_secret("test-master");
        let sealed = secret_box.seal("payload").unwrap();
        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert!(matches!(
            secret_box.open(&tampered),
            Err(StoreError::Decrypt)
        ));
    }

    #[test]
    fn test_open_rejects_wrong_master_secret() {
        let sealed = SecretBox::from_master_secret("old-secret")
            .seal("payload")
            .unwrap();
        let rotated = SecretBox::from_master_secret("new-secret");
        assert!(matches!(rotated.open(&sealed), Err(StoreError::Decrypt)));
    }
}
