use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, instrument, warn};

use crate::{
    adapter::{MemoryStorageAdapter, StorageAdapter, StorageError},
    crypto::{AesGcmProvider, CryptoError, CryptoProvider, KeyHandle, KeyOrigin},
    envelope::{self, EnvelopeError},
};

/// Record name the generated key is persisted under unless overridden.
pub const DEFAULT_STORAGE_KEY_NAME: &str = "client_enc_key_v1";

/// Default idle deadline before key material is cleared: 9 hours.
pub const DEFAULT_AUTO_CLEAR: Duration = Duration::from_secs(9 * 60 * 60);

/// Errors surfaced by [`SecureStore`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecureStoreError {
    /// The crypto capability itself is unusable on this host.
    #[error("crypto provider unavailable: {reason}")]
    Environment { reason: String },
    /// Key establishment could not complete.
    #[error("key establishment failed: {reason}")]
    KeyState { reason: String },
    /// Decryption integrity check failed, or the envelope is malformed.
    #[error("authentication failed: {reason}")]
    Authentication { reason: String },
    /// The storage adapter's underlying medium failed.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl From<StorageError> for SecureStoreError {
    fn from(err: StorageError) -> Self {
        let StorageError::Io { reason } = err;
        SecureStoreError::Storage { reason }
    }
}

impl From<CryptoError> for SecureStoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => SecureStoreError::Authentication {
                reason: "integrity tag did not verify".to_string(),
            },
            CryptoError::InvalidKey { reason } => SecureStoreError::KeyState { reason },
            CryptoError::NotExtractable => SecureStoreError::KeyState {
                reason: "key is not extractable".to_string(),
            },
            CryptoError::Cipher { reason } => SecureStoreError::Environment { reason },
        }
    }
}

impl From<EnvelopeError> for SecureStoreError {
    fn from(err: EnvelopeError) -> Self {
        SecureStoreError::Authentication {
            reason: err.to_string(),
        }
    }
}

/// Construction-time configuration. Every field is optional; defaults match
/// the documented contract (in-memory adapter, `client_enc_key_v1` record
/// name, 9 hour auto-clear, AES-GCM provider).
#[derive(Clone, Default)]
pub struct SecureStoreOptions {
    /// Override the persistence backend.
    pub storage_adapter: Option<Arc<dyn StorageAdapter>>,
    /// Record name for the persisted key.
    pub storage_key_name: Option<String>,
    /// Default deadline for [`SecureStore::auto_clear_data`].
    pub auto_clear_timeout: Option<Duration>,
    /// Caller-supplied base64 raw key. When present, establishment imports it
    /// and never touches the storage adapter.
    pub user_key: Option<String>,
    /// Override the crypto capability (tests, hardware-backed providers).
    pub crypto_provider: Option<Arc<dyn CryptoProvider>>,
}

struct State {
    key: Option<KeyHandle>,
    adapter: Arc<dyn StorageAdapter>,
}

#[derive(Default)]
struct IdleTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Encryption-at-rest store owning at most one active AES-256-GCM key.
///
/// The key is established lazily on first use: a caller-supplied key wins,
/// otherwise a previously persisted record is reloaded (non-extractable),
/// otherwise a fresh key is generated and written through the adapter.
/// All mutable state sits behind one async mutex, so concurrent first-use
/// calls serialize and exactly one key is ever established.
pub struct SecureStore {
    crypto: Arc<dyn CryptoProvider>,
    storage_key_name: String,
    auto_clear_default: Duration,
    user_key: Option<String>,
    state: Mutex<State>,
    idle_timer: StdMutex<IdleTimer>,
}

impl SecureStore {
    pub fn new(options: SecureStoreOptions) -> Self {
        Self {
            crypto: options
                .crypto_provider
                .unwrap_or_else(|| Arc::new(AesGcmProvider)),
            storage_key_name: options
                .storage_key_name
                .unwrap_or_else(|| DEFAULT_STORAGE_KEY_NAME.to_string()),
            auto_clear_default: options.auto_clear_timeout.unwrap_or(DEFAULT_AUTO_CLEAR),
            user_key: options.user_key,
            state: Mutex::new(State {
                key: None,
                adapter: options
                    .storage_adapter
                    .unwrap_or_else(|| Arc::new(MemoryStorageAdapter::new())),
            }),
            idle_timer: StdMutex::new(IdleTimer::default()),
        }
    }

    /// Eagerly establish the active key; a no-op when one is already held.
    /// Encrypt and decrypt call this implicitly on first use.
    #[instrument(skip_all)]
    pub async fn establish_key(&self) -> Result<(), SecureStoreError> {
        let mut state = self.state.lock().await;
        self.ensure_key(&mut state).await
    }

    /// Encrypt a string into a base64 `IV || ciphertext` envelope.
    ///
    /// May trigger key establishment, and therefore a storage write, on
    /// first use.
    #[instrument(skip_all)]
    pub async fn encrypt(&self, plaintext: &str) -> Result<String, SecureStoreError> {
        let mut state = self.state.lock().await;
        self.ensure_key(&mut state).await?;
        let key = active_key(&state)?;

        let iv = self.crypto.generate_iv();
        let ciphertext = self.crypto.encrypt(key, &iv, plaintext.as_bytes()).await?;
        Ok(envelope::seal(&iv, &ciphertext))
    }

    /// Decrypt an envelope produced by [`SecureStore::encrypt`].
    #[instrument(skip_all)]
    pub async fn decrypt(&self, sealed: &str) -> Result<String, SecureStoreError> {
        let mut state = self.state.lock().await;
        self.ensure_key(&mut state).await?;
        let key = active_key(&state)?;

        let (iv, ciphertext) = envelope::open(sealed)?;
        let plaintext = self.crypto.decrypt(key, &iv, &ciphertext).await?;
        String::from_utf8(plaintext).map_err(|_| SecureStoreError::Authentication {
            reason: "decrypted payload is not valid UTF-8".to_string(),
        })
    }

    /// (Re)schedule the one-shot idle clear. Any pending timer is cancelled
    /// first, so repeated calls reset the deadline rather than stacking
    /// clears. Defaults to the configured timeout (9 hours).
    pub fn auto_clear_data(self: &Arc<Self>, timeout: Option<Duration>) {
        let deadline = timeout.unwrap_or(self.auto_clear_default);
        let Ok(mut slot) = self.idle_timer.lock() else {
            // Poisoned slot means a scheduling thread panicked; nothing sane
            // to replace.
            return;
        };
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }

        let store = Arc::downgrade(self);
        debug!(?deadline, "scheduling idle clear");
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let Some(store) = store.upgrade() else {
                return;
            };
            // A newer timer may have replaced this one while it slept; only
            // the latest generation gets to clear.
            if !store.finish_idle_timer(generation) {
                return;
            }
            if let Err(err) = store.clear_all_data().await {
                warn!("idle auto-clear failed: {err}");
            }
        }));
    }

    /// Drop the in-memory key, cancel any pending idle timer, and wipe every
    /// record the storage adapter owns. The only operation that removes the
    /// persisted key record.
    #[instrument(skip_all)]
    pub async fn clear_all_data(&self) -> Result<(), SecureStoreError> {
        let mut state = self.state.lock().await;
        state.key = None;
        self.cancel_idle_timer();
        state.adapter.clear_all().await?;
        debug!("cleared key and owned records");
        Ok(())
    }

    /// Swap the persistence backend for future operations. Does not migrate
    /// records left in the previous adapter or touch an established key.
    pub async fn set_storage_adapter(&self, adapter: Arc<dyn StorageAdapter>) {
        let mut state = self.state.lock().await;
        state.adapter = adapter;
    }

    /// Export the active key as base64, or `None` when no key is held or the
    /// key was reloaded from storage (non-extractable).
    #[instrument(skip_all)]
    pub async fn current_key_base64(&self) -> Result<Option<String>, SecureStoreError> {
        let state = self.state.lock().await;
        let Some(key) = state.key.as_ref() else {
            return Ok(None);
        };
        if !key.is_extractable() {
            return Ok(None);
        }
        let raw = self.crypto.export_key(key).await?;
        Ok(Some(STANDARD.encode(raw)))
    }

    /// Idempotent lazy key establishment; see the type-level docs for the
    /// precedence order.
    async fn ensure_key(&self, state: &mut State) -> Result<(), SecureStoreError> {
        if state.key.is_some() {
            return Ok(());
        }

        let key = if let Some(user_key) = &self.user_key {
            let raw = STANDARD
                .decode(user_key)
                .map_err(|e| SecureStoreError::KeyState {
                    reason: format!("caller-supplied key is not valid base64: {e}"),
                })?;
            debug!("importing caller-supplied key");
            self.crypto
                .import_key(&raw, KeyOrigin::Imported, true)
                .await?
        } else {
            match state.adapter.get_item(&self.storage_key_name).await? {
                Some(stored) => {
                    let raw = STANDARD
                        .decode(&stored)
                        .map_err(|e| SecureStoreError::KeyState {
                            reason: format!("persisted key record is not valid base64: {e}"),
                        })?;
                    debug!("reloading persisted key as non-extractable");
                    self.crypto.import_key(&raw, KeyOrigin::Loaded, false).await?
                }
                None => {
                    debug!("generating fresh key");
                    let key = self.crypto.generate_key().await?;
                    let exported = self.crypto.export_key(&key).await?;
                    state
                        .adapter
                        .set_item(&self.storage_key_name, &STANDARD.encode(exported))
                        .await?;
                    key
                }
            }
        };

        state.key = Some(key);
        Ok(())
    }

    /// Detach the timer for `generation` from its slot. Returns false when a
    /// newer timer superseded it.
    fn finish_idle_timer(&self, generation: u64) -> bool {
        let Ok(mut slot) = self.idle_timer.lock() else {
            return false;
        };
        if slot.generation != generation {
            return false;
        }
        slot.handle.take();
        true
    }

    fn cancel_idle_timer(&self) {
        if let Ok(mut slot) = self.idle_timer.lock() {
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
        }
    }
}

impl Default for SecureStore {
    fn default() -> Self {
        Self::new(SecureStoreOptions::default())
    }
}

impl Drop for SecureStore {
    fn drop(&mut self) {
        self.cancel_idle_timer();
    }
}

fn active_key(state: &State) -> Result<&KeyHandle, SecureStoreError> {
    state.key.as_ref().ok_or_else(|| SecureStoreError::KeyState {
        reason: "key establishment did not produce a key".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{IV_BYTES, KEY_BYTES};

    fn store_with(adapter: Arc<dyn StorageAdapter>) -> Arc<SecureStore> {
        Arc::new(SecureStore::new(SecureStoreOptions {
            storage_adapter: Some(adapter),
            ..Default::default()
        }))
    }

    fn fixed_user_key() -> String {
        STANDARD.encode([5u8; KEY_BYTES])
    }

    fn flip_bit(sealed: &str, index: usize) -> String {
        let mut bytes = STANDARD.decode(sealed).expect("decode envelope");
        bytes[index] ^= 0x01;
        STANDARD.encode(bytes)
    }

    #[tokio::test]
    async fn round_trip_returns_original_plaintext() {
        let store = SecureStore::default();
        let sealed = store.encrypt("hello").await.expect("encrypt");
        assert_eq!(store.decrypt(&sealed).await.expect("decrypt"), "hello");
    }

    #[tokio::test]
    async fn same_plaintext_yields_distinct_envelopes() {
        let store = SecureStore::default();
        let first = store.encrypt("same").await.expect("encrypt");
        let second = store.encrypt("same").await.expect("encrypt");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_authentication() {
        let store = SecureStore::default();
        let sealed = store.encrypt("integrity matters").await.expect("encrypt");

        let tampered = flip_bit(&sealed, IV_BYTES); // first ciphertext byte
        let err = store.decrypt(&tampered).await.expect_err("must fail");
        assert!(matches!(err, SecureStoreError::Authentication { .. }));
    }

    #[tokio::test]
    async fn tampered_iv_never_yields_original_plaintext() {
        let store = SecureStore::default();
        let sealed = store.encrypt("integrity matters").await.expect("encrypt");

        // GCM binds the IV into the tag, so this fails outright.
        let tampered = flip_bit(&sealed, 0);
        let err = store.decrypt(&tampered).await.expect_err("must fail");
        assert!(matches!(err, SecureStoreError::Authentication { .. }));
    }

    #[tokio::test]
    async fn garbage_envelopes_are_rejected() {
        let store = SecureStore::default();
        let err = store.decrypt("not an envelope").await.expect_err("fail");
        assert!(matches!(err, SecureStoreError::Authentication { .. }));

        let short = STANDARD.encode([0u8; IV_BYTES - 2]);
        let err = store.decrypt(&short).await.expect_err("fail");
        assert!(matches!(err, SecureStoreError::Authentication { .. }));
    }

    #[tokio::test]
    async fn caller_supplied_keys_interoperate_across_stores() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let first = Arc::new(SecureStore::new(SecureStoreOptions {
            storage_adapter: Some(adapter.clone()),
            user_key: Some(fixed_user_key()),
            ..Default::default()
        }));
        let second = Arc::new(SecureStore::new(SecureStoreOptions {
            user_key: Some(fixed_user_key()),
            ..Default::default()
        }));

        let sealed = first.encrypt("hello").await.expect("encrypt");
        assert_eq!(second.decrypt(&sealed).await.expect("decrypt"), "hello");

        // The caller-supplied path must never persist a record.
        assert_eq!(
            adapter
                .get_item(DEFAULT_STORAGE_KEY_NAME)
                .await
                .expect("get"),
            None
        );
    }

    #[tokio::test]
    async fn invalid_caller_key_is_a_key_state_error() {
        let store = Arc::new(SecureStore::new(SecureStoreOptions {
            user_key: Some("!!not-base64!!".to_string()),
            ..Default::default()
        }));
        let err = store.encrypt("x").await.expect_err("must fail");
        assert!(matches!(err, SecureStoreError::KeyState { .. }));
    }

    #[tokio::test]
    async fn persisted_key_lets_a_second_store_decrypt() {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::new());
        let first = store_with(adapter.clone());
        let sealed = first.encrypt("shared secret").await.expect("encrypt");

        let second = store_with(adapter);
        assert_eq!(
            second.decrypt(&sealed).await.expect("decrypt"),
            "shared secret"
        );
    }

    #[tokio::test]
    async fn reloaded_keys_are_not_exportable() {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::new());
        let first = store_with(adapter.clone());
        let sealed = first.encrypt("x").await.expect("encrypt");
        assert!(first
            .current_key_base64()
            .await
            .expect("export")
            .is_some());

        let second = store_with(adapter);
        second.decrypt(&sealed).await.expect("decrypt");
        assert_eq!(second.current_key_base64().await.expect("export"), None);
    }

    #[tokio::test]
    async fn key_record_is_persisted_as_plain_base64() {
        // The key record is NOT wrapped before it reaches the adapter; the
        // medium is trusted for confidentiality of the blob itself.
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = store_with(adapter.clone());
        store.encrypt("x").await.expect("encrypt");

        let record = adapter
            .get_item(DEFAULT_STORAGE_KEY_NAME)
            .await
            .expect("get")
            .expect("record present");
        let raw = STANDARD.decode(&record).expect("record is base64");
        assert_eq!(raw.len(), KEY_BYTES);
        assert_eq!(
            store.current_key_base64().await.expect("export"),
            Some(record)
        );
    }

    #[tokio::test]
    async fn clear_wipes_record_and_forces_regeneration() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = store_with(adapter.clone());
        let before = store.encrypt("old key").await.expect("encrypt");

        store.clear_all_data().await.expect("clear");
        assert_eq!(
            adapter
                .get_item(DEFAULT_STORAGE_KEY_NAME)
                .await
                .expect("get"),
            None
        );

        // Next use generates a fresh key; old envelopes no longer decrypt.
        store.encrypt("new key").await.expect("encrypt");
        let err = store.decrypt(&before).await.expect_err("stale envelope");
        assert!(matches!(err, SecureStoreError::Authentication { .. }));
    }

    #[tokio::test]
    async fn swapping_adapters_keeps_the_established_key() {
        let first: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::new());
        let store = store_with(first.clone());
        let sealed = store.encrypt("x").await.expect("encrypt");

        store
            .set_storage_adapter(Arc::new(MemoryStorageAdapter::new()))
            .await;
        // In-memory key survives the swap; old records are not migrated.
        assert_eq!(store.decrypt(&sealed).await.expect("decrypt"), "x");
        assert!(first
            .get_item(DEFAULT_STORAGE_KEY_NAME)
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn idle_timer_clears_after_deadline() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = store_with(adapter.clone());
        store.encrypt("x").await.expect("encrypt");

        store.auto_clear_data(Some(Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(
            adapter
                .get_item(DEFAULT_STORAGE_KEY_NAME)
                .await
                .expect("get"),
            None
        );
        assert_eq!(store.current_key_base64().await.expect("export"), None);
    }

    #[tokio::test]
    async fn rescheduling_resets_the_deadline_instead_of_stacking() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = store_with(adapter.clone());
        store.encrypt("x").await.expect("encrypt");

        store.auto_clear_data(Some(Duration::from_millis(400)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        store.auto_clear_data(Some(Duration::from_millis(400)));

        // Past the first deadline, but the reset cancelled it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(adapter
            .get_item(DEFAULT_STORAGE_KEY_NAME)
            .await
            .expect("get")
            .is_some());

        // Past the second deadline: exactly one clear fired.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            adapter
                .get_item(DEFAULT_STORAGE_KEY_NAME)
                .await
                .expect("get"),
            None
        );
    }

    #[tokio::test]
    async fn clear_cancels_a_pending_timer() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = store_with(adapter.clone());
        store.encrypt("x").await.expect("encrypt");

        store.auto_clear_data(Some(Duration::from_millis(100)));
        store.clear_all_data().await.expect("clear");

        // Re-establish after the explicit clear; the old timer must not fire.
        store.encrypt("y").await.expect("encrypt");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(adapter
            .get_item(DEFAULT_STORAGE_KEY_NAME)
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn concurrent_first_use_establishes_exactly_one_key() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = store_with(adapter.clone());

        let (a, b) = tokio::join!(store.encrypt("left"), store.encrypt("right"));
        let sealed_a = a.expect("encrypt");
        let sealed_b = b.expect("encrypt");

        // Both envelopes decrypt under the single established key.
        assert_eq!(store.decrypt(&sealed_a).await.expect("decrypt"), "left");
        assert_eq!(store.decrypt(&sealed_b).await.expect("decrypt"), "right");
    }
}
