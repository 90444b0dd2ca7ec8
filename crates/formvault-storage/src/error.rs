use formvault_core::{BackendError, CodecError};
use thiserror::Error;

/// Initialization of the long-lived key did not complete. This is the only
/// failure the store reports to callers instead of degrading silently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyInitializationError {
    #[error("key slot unreadable: {0}")]
    Backend(BackendError),
    #[error("key slot could not be written: {0}")]
    Persist(BackendError),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("cipher import failed: {0}")]
    Import(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Seal/open attempted before the key was initialized (or after dispose).
    #[error("encryption key not initialized; call initialize() first")]
    KeyNotReady,
    /// Tag did not verify: tampered envelope or a foreign key.
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("encrypt failed: {0}")]
    EncryptionFailed(String),
}

/// Distinguishing error for the `try_*` operations of the encrypted store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key `{key}` is reserved for key material")]
    ReservedKey { key: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

impl StoreError {
    /// Misuse faults, as opposed to environmental or data failures.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            StoreError::Cipher(CipherError::KeyNotReady) | StoreError::ReservedKey { .. }
        )
    }
}
