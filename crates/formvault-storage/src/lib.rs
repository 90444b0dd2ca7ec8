//! Encrypted persistence for formvault: a long-lived AES-256-GCM key kept in a
//! reserved backend slot, sealed envelopes, and the fail-soft store façade.

pub mod cipher;
pub mod encrypted_store;
pub mod error;
pub mod file_backend;
pub mod key_manager;

pub use cipher::{CipherService, Envelope};
pub use encrypted_store::EncryptedStore;
pub use error::{CipherError, KeyInitializationError, StoreError};
pub use file_backend::FileBackend;
pub use key_manager::{KeyHandle, KeyManager, KEY_SLOT};
