use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use thiserror::Error;

/// Raw length of a 256-bit AES key.
pub const KEY_BYTES: usize = 32;
/// AES-GCM initialization vector length (96 bits).
pub const IV_BYTES: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Raw material rejected at import (wrong length, unusable bytes).
    #[error("invalid key material: {reason}")]
    InvalidKey { reason: String },
    /// Export requested for a key imported as non-extractable.
    #[error("key is not extractable")]
    NotExtractable,
    /// Integrity tag verification failed during decryption.
    #[error("authentication failed")]
    Authentication,
    /// The primitive itself failed (cipher init or encryption).
    #[error("cipher failure: {reason}")]
    Cipher { reason: String },
}

/// How the active key came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Generated,
    Imported,
    Loaded,
}

/// Opaque handle to 256-bit AES-GCM key material.
///
/// A handle reloaded from persisted storage is marked non-extractable so its
/// raw bytes can never be exported again after they were committed to disk.
#[derive(Clone)]
pub struct KeyHandle {
    raw: [u8; KEY_BYTES],
    origin: KeyOrigin,
    extractable: bool,
}

impl KeyHandle {
    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub fn is_extractable(&self) -> bool {
        self.extractable
    }
}

// Key bytes must never appear in logs.
impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("origin", &self.origin)
            .field("extractable", &self.extractable)
            .finish_non_exhaustive()
    }
}

/// Cryptographic capability consumed by the secure store: key generation,
/// raw import/export, and AES-256-GCM with a 96-bit IV and 128-bit tag.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    async fn generate_key(&self) -> Result<KeyHandle, CryptoError>;

    async fn import_key(
        &self,
        raw: &[u8],
        origin: KeyOrigin,
        extractable: bool,
    ) -> Result<KeyHandle, CryptoError>;

    async fn export_key(&self, key: &KeyHandle) -> Result<Vec<u8>, CryptoError>;

    /// Draw a fresh random IV. Must never repeat under the same key.
    fn generate_iv(&self) -> [u8; IV_BYTES];

    async fn encrypt(
        &self,
        key: &KeyHandle,
        iv: &[u8; IV_BYTES],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    async fn decrypt(
        &self,
        key: &KeyHandle,
        iv: &[u8; IV_BYTES],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

/// Default provider built on the `aes-gcm` crate with the OS RNG.
#[derive(Debug, Default, Clone)]
pub struct AesGcmProvider;

impl AesGcmProvider {
    fn cipher(key: &KeyHandle) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&key.raw).map_err(|e| CryptoError::Cipher {
            reason: format!("cipher init failed: {e}"),
        })
    }
}

#[async_trait]
impl CryptoProvider for AesGcmProvider {
    async fn generate_key(&self) -> Result<KeyHandle, CryptoError> {
        let mut raw = [0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut raw);
        Ok(KeyHandle {
            raw,
            origin: KeyOrigin::Generated,
            extractable: true,
        })
    }

    async fn import_key(
        &self,
        raw: &[u8],
        origin: KeyOrigin,
        extractable: bool,
    ) -> Result<KeyHandle, CryptoError> {
        if raw.len() != KEY_BYTES {
            return Err(CryptoError::InvalidKey {
                reason: format!("expected {KEY_BYTES} bytes, got {}", raw.len()),
            });
        }
        let mut out = [0u8; KEY_BYTES];
        out.copy_from_slice(raw);
        Ok(KeyHandle {
            raw: out,
            origin,
            extractable,
        })
    }

    async fn export_key(&self, key: &KeyHandle) -> Result<Vec<u8>, CryptoError> {
        if !key.extractable {
            return Err(CryptoError::NotExtractable);
        }
        Ok(key.raw.to_vec())
    }

    fn generate_iv(&self) -> [u8; IV_BYTES] {
        Aes256Gcm::generate_nonce(&mut OsRng).into()
    }

    async fn encrypt(
        &self,
        key: &KeyHandle,
        iv: &[u8; IV_BYTES],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;
        cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|e| CryptoError::Cipher {
                reason: format!("encrypt failed: {e}"),
            })
    }

    async fn decrypt(
        &self,
        key: &KeyHandle,
        iv: &[u8; IV_BYTES],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;
        cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn import_rejects_wrong_length() {
        let provider = AesGcmProvider;
        let err = provider
            .import_key(b"short", KeyOrigin::Imported, true)
            .await
            .expect_err("should reject wrong length");
        assert!(matches!(err, CryptoError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn export_refuses_non_extractable_keys() {
        let provider = AesGcmProvider;
        let key = provider
            .import_key(&[7u8; KEY_BYTES], KeyOrigin::Loaded, false)
            .await
            .expect("import");
        let err = provider
            .export_key(&key)
            .await
            .expect_err("export must be refused");
        assert_eq!(err, CryptoError::NotExtractable);
    }

    #[tokio::test]
    async fn generated_keys_are_extractable_and_distinct() {
        let provider = AesGcmProvider;
        let first = provider.generate_key().await.expect("generate");
        let second = provider.generate_key().await.expect("generate");

        assert!(first.is_extractable());
        assert_eq!(first.origin(), KeyOrigin::Generated);
        let a = provider.export_key(&first).await.expect("export");
        let b = provider.export_key(&second).await.expect("export");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn debug_output_never_contains_key_bytes() {
        let provider = AesGcmProvider;
        let key = provider
            .import_key(&[0xAB; KEY_BYTES], KeyOrigin::Imported, true)
            .await
            .expect("import");
        let rendered = format!("{key:?}");
        assert!(rendered.contains("Imported"));
        assert!(!rendered.contains("171")); // 0xAB
    }
}
