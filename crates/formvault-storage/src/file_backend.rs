use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use formvault_core::{BackendError, StorageBackend};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::instrument;

/// Longest file name this backend produces; stays under the common 255-byte limit.
const MAX_NAME_LEN: usize = 200;

/// Directory-backed string store: one file per key, written atomically.
/// Survives process restarts, so a new session over the same root sees the
/// same key slot and records.
///
/// File names are `k_<base64url(key)>`, or `h_<base64url(sha256(key))>` when
/// the encoded key would exceed `MAX_NAME_LEN`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    #[instrument(skip_all, fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(storage_err(err)),
        }
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        fs::create_dir_all(&self.root).map_err(unavailable)?;
        write_atomic(&self.path_for(key), value.as_bytes())
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_err(err)),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let parent = path.parent().ok_or_else(|| BackendError::Storage {
        reason: "invalid storage path".to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    tmp.write_all(bytes).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn sanitize_key(key: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(key);
    if encoded.len() + 2 <= MAX_NAME_LEN {
        return format!("k_{encoded}");
    }
    format!("h_{}", URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes())))
}

fn storage_err<E: ToString>(err: E) -> BackendError {
    BackendError::Storage {
        reason: err.to_string(),
    }
}

fn unavailable<E: ToString>(err: E) -> BackendError {
    BackendError::Unavailable {
        reason: err.to_string(),
    }
}
