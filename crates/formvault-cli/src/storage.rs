use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use formvault_storage::{EncryptedStore, FileBackend};
use tracing::debug;

/// Resolve the default data directory for formvault.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("formvault"))
}

/// Build the encrypted store, honoring a `data_dir` override from config.
pub fn store_from_config(config: &Config) -> Result<EncryptedStore<FileBackend>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "opening encrypted store");
    Ok(EncryptedStore::new(FileBackend::new(root)))
}

/// Helper for tests to construct a store rooted at a temp dir.
#[cfg(test)]
pub fn test_store(root: impl Into<PathBuf>) -> EncryptedStore<FileBackend> {
    EncryptedStore::new(FileBackend::new(root))
}
