use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by key-value storage backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Backend cannot be reached at all (quota, lock poisoned, storage disabled).
    #[error("storage backend unavailable: {reason}")]
    Unavailable { reason: String },
    /// A single read, write or delete failed.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Opaque string key-value store that encrypted records are persisted into.
///
/// Implementations only ever see already-sealed envelopes and the encoded key
/// slot; they never observe plaintext models.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve the value for a key, `None` when nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Persist a value under a key, overwriting any existing entry.
    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Remove a key and its value (idempotent).
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

/// Process-local backend for tests and ephemeral sessions.
///
/// Clones share the same map, so two stores built over clones behave like two
/// sessions of the same origin.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including the reserved key slot.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let map = self.inner.lock().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut map = self.inner.lock().map_err(poisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let mut map = self.inner.lock().map_err(poisoned)?;
        map.remove(key);
        Ok(())
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> BackendError {
    BackendError::Unavailable {
        reason: format!("lock poisoned: {err}"),
    }
}
