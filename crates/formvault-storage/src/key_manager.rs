use std::{fmt, sync::Arc};

use aes_gcm::{Aes256Gcm, KeyInit};
use base64::{engine::general_purpose, Engine as _};
use formvault_core::StorageBackend;
use rand::{rngs::OsRng, RngCore};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::error::{CipherError, KeyInitializationError};

/// Reserved backend slot holding the encoded symmetric key.
pub const KEY_SLOT: &str = "form_encryption_key";

/// Raw key length: 256 bits.
pub const KEY_LEN: usize = 32;

/// Initialized encryption handle. Raw key bytes never leave this type.
#[derive(Clone)]
pub struct KeyHandle {
    /// Slot the key was loaded from (for logging; never log key bytes).
    id: String,
    cipher: Aes256Gcm,
}

impl KeyHandle {
    pub(crate) fn import(id: &str, bytes: &[u8; KEY_LEN]) -> Result<Self, KeyInitializationError> {
        let cipher = Aes256Gcm::new_from_slice(bytes)
            .map_err(|e| KeyInitializationError::Import(e.to_string()))?;
        Ok(Self {
            id: id.to_string(),
            cipher,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn cipher(&self) -> &Aes256Gcm {
        &self.cipher
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Owns the session key: loads it from the reserved slot, or generates and
/// persists a fresh one on first use. Initialization runs at most once per
/// manager; later calls return the cached handle.
pub struct KeyManager<B: StorageBackend> {
    backend: Arc<B>,
    slot: String,
    handle: OnceCell<KeyHandle>,
}

impl<B: StorageBackend> KeyManager<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_slot(backend, KEY_SLOT)
    }

    pub fn with_slot(backend: Arc<B>, slot: impl Into<String>) -> Self {
        Self {
            backend,
            slot: slot.into(),
            handle: OnceCell::new(),
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn is_ready(&self) -> bool {
        self.handle.initialized()
    }

    /// Load or create the key. Concurrent callers share a single attempt; a
    /// failed attempt leaves the manager uninitialized so it can be retried.
    #[instrument(skip_all, fields(slot = %self.slot))]
    pub async fn ensure_key(&self) -> Result<&KeyHandle, KeyInitializationError> {
        self.handle
            .get_or_try_init(|| self.load_or_generate())
            .await
    }

    /// Handle for seal/open; `KeyNotReady` until `ensure_key` has succeeded.
    pub fn handle(&self) -> Result<&KeyHandle, CipherError> {
        self.handle.get().ok_or(CipherError::KeyNotReady)
    }

    /// Drop the cached handle. Returns whether one was held.
    pub fn release(&mut self) -> bool {
        let released = self.handle.take().is_some();
        if released {
            debug!(slot = %self.slot, "released key handle");
        }
        released
    }

    async fn load_or_generate(&self) -> Result<KeyHandle, KeyInitializationError> {
        let stored = self
            .backend
            .get(&self.slot)
            .await
            .map_err(KeyInitializationError::Backend)?;

        let encoded = match stored {
            Some(existing) if !existing.is_empty() => {
                debug!("reusing persisted key");
                existing
            }
            _ => {
                let encoded = encode_key(&generate_key());
                self.backend
                    .set(&self.slot, &encoded)
                    .await
                    .map_err(KeyInitializationError::Persist)?;
                info!("generated and persisted new key");
                encoded
            }
        };

        let bytes = decode_key(&encoded)?;
        KeyHandle::import(&self.slot, &bytes)
    }
}

fn generate_key() -> [u8; KEY_LEN] {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn encode_key(bytes: &[u8; KEY_LEN]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

fn decode_key(secret: &str) -> Result<[u8; KEY_LEN], KeyInitializationError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyInitializationError::Decode(e.to_string()))?;

    if bytes.len() != KEY_LEN {
        return Err(KeyInitializationError::Decode(format!(
            "expected {KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}
