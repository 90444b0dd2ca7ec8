use std::sync::Arc;

use formvault_core::{CodecError, JsonCodec, ModelCodec, StorageBackend};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::{
    cipher::{CipherService, Envelope},
    error::{KeyInitializationError, StoreError},
    key_manager::KeyManager,
};

/// Transparent at-rest encryption over a string key-value backend.
///
/// `initialize` must succeed before `save`/`load` do anything useful. Those
/// two, and `remove`, are fail-soft: every failure collapses to `false` or
/// `None` and is only visible in the logs. The `try_*` variants return the
/// underlying [`StoreError`] instead.
pub struct EncryptedStore<B: StorageBackend, C: ModelCodec = JsonCodec> {
    backend: Arc<B>,
    keys: KeyManager<B>,
    cipher: CipherService,
    codec: C,
}

impl<B: StorageBackend> EncryptedStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_codec(backend, JsonCodec)
    }
}

impl<B: StorageBackend, C: ModelCodec> EncryptedStore<B, C> {
    pub fn with_codec(backend: B, codec: C) -> Self {
        Self::from_shared(Arc::new(backend), codec)
    }

    pub fn from_shared(backend: Arc<B>, codec: C) -> Self {
        Self {
            keys: KeyManager::new(Arc::clone(&backend)),
            backend,
            cipher: CipherService,
            codec,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_initialized(&self) -> bool {
        self.keys.is_ready()
    }

    /// Load or create the session key. Safe to call repeatedly.
    #[instrument(skip_all)]
    pub async fn initialize(&self) -> Result<(), KeyInitializationError> {
        match self.keys.ensure_key().await {
            Ok(handle) => {
                debug!(key_id = handle.id(), "encrypted store ready");
                Ok(())
            }
            Err(err) => {
                error!(%err, "key initialization failed");
                Err(err)
            }
        }
    }

    /// Release the key handle. A later `initialize` reloads the persisted key.
    pub fn dispose(&mut self) -> bool {
        self.keys.release()
    }

    /// Seal and persist `model`, overwriting any record under `key`.
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, model: &T) -> bool {
        match self.try_save(key, model).await {
            Ok(()) => true,
            Err(err) => {
                report("save", key, &err);
                false
            }
        }
    }

    /// Absent records and undecryptable ones are both `None`.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_load(key).await {
            Ok(model) => model,
            Err(err) => {
                report("load", key, &err);
                None
            }
        }
    }

    pub async fn remove(&self, key: &str) -> bool {
        match self.try_remove(key).await {
            Ok(()) => true,
            Err(err) => {
                report("remove", key, &err);
                false
            }
        }
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn try_save<T: Serialize + ?Sized>(
        &self,
        key: &str,
        model: &T,
    ) -> Result<(), StoreError> {
        self.check_key(key)?;
        let handle = self.keys.handle()?;

        let payload = self.codec.serialize(model)?;
        let envelope = self.cipher.seal(payload.as_bytes(), handle)?;
        self.backend.set(key, &envelope.to_wire()?).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.check_key(key)?;
        let handle = self.keys.handle()?;

        let raw = match self.backend.get(key).await? {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };

        let envelope = Envelope::from_wire(&raw)?;
        let plaintext = self.cipher.open(&envelope, handle)?;
        let payload =
            String::from_utf8(plaintext).map_err(|e| CodecError::Deserialize(e.to_string()))?;
        Ok(Some(self.codec.deserialize(&payload)?))
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn try_remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_key(key)?;
        self.backend.delete(key).await?;
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<(), StoreError> {
        if key == self.keys.slot() {
            return Err(StoreError::ReservedKey {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

fn report(op: &'static str, key: &str, err: &StoreError) {
    if err.is_misuse() {
        error!(op, key, %err, "rejected encrypted store call");
    } else {
        warn!(op, key, %err, "encrypted store call failed; returning default");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use formvault_core::{BackendError, InMemoryBackend};
    use serde::Deserialize;

    use super::*;
    use crate::{error::CipherError, file_backend::FileBackend, key_manager::KEY_SLOT};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Profile {
        name: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SignupForm {
        email: String,
        newsletter: bool,
        interests: Vec<String>,
        age: Option<u8>,
    }

    fn ana() -> Profile {
        Profile { name: "Ana".into() }
    }

    async fn ready_store() -> EncryptedStore<InMemoryBackend> {
        let store = EncryptedStore::new(InMemoryBackend::new());
        store.initialize().await.expect("initialize");
        store
    }

    /// Accepts the key slot but refuses every caller write and delete.
    #[derive(Default)]
    struct QuotaExceeded {
        inner: InMemoryBackend,
    }

    #[async_trait]
    impl StorageBackend for QuotaExceeded {
        async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
            if key == KEY_SLOT {
                return self.inner.set(key, value).await;
            }
            Err(BackendError::Storage {
                reason: "quota exceeded".into(),
            })
        }

        async fn delete(&self, _key: &str) -> Result<(), BackendError> {
            Err(BackendError::Unavailable {
                reason: "storage disabled".into(),
            })
        }
    }

    #[tokio::test]
    async fn save_load_remove_scenario() {
        let store = ready_store().await;

        assert!(store.save("profile", &ana()).await);
        assert_eq!(store.load::<Profile>("profile").await, Some(ana()));
        assert!(store.remove("profile").await);
        assert_eq!(store.load::<Profile>("profile").await, None);
    }

    #[tokio::test]
    async fn round_trips_nested_models() {
        let store = ready_store().await;
        let form = SignupForm {
            email: "ana@example.com".into(),
            newsletter: true,
            interests: vec!["rust".into(), "crypto".into()],
            age: None,
        };

        assert!(store.save("signup", &form).await);
        assert_eq!(store.load::<SignupForm>("signup").await, Some(form));
    }

    #[tokio::test]
    async fn plaintext_never_reaches_backend() {
        let store = ready_store().await;
        assert!(store.save("profile", &ana()).await);

        let stored = store.backend().get("profile").await.expect("get").expect("record");
        assert!(!stored.contains("Ana"), "plaintext must not be stored");
        Envelope::from_wire(&stored).expect("stored value is an envelope");
    }

    #[tokio::test]
    async fn repeated_save_overwrites() {
        let store = ready_store().await;
        assert!(store.save("profile", &ana()).await);
        assert!(store.save("profile", &Profile { name: "Bo".into() }).await);

        assert_eq!(
            store.load::<Profile>("profile").await,
            Some(Profile { name: "Bo".into() })
        );
    }

    #[tokio::test]
    async fn initialize_twice_keeps_records_readable() {
        let store = EncryptedStore::new(InMemoryBackend::new());
        store.initialize().await.expect("first");
        assert!(store.save("profile", &ana()).await);

        store.initialize().await.expect("second");
        assert_eq!(store.load::<Profile>("profile").await, Some(ana()));
        assert!(store.save("other", &ana()).await);
        assert_eq!(store.load::<Profile>("other").await, Some(ana()));
    }

    #[tokio::test]
    async fn concurrent_initialize_generates_one_key() {
        let backend = InMemoryBackend::new();
        let store = EncryptedStore::new(backend.clone());

        let (a, b) = tokio::join!(store.initialize(), store.initialize());
        a.expect("first");
        b.expect("second");

        assert_eq!(backend.len(), 1);
        assert!(store.save("profile", &ana()).await);
        assert_eq!(store.load::<Profile>("profile").await, Some(ana()));
    }

    #[tokio::test]
    async fn sequential_saves_never_reuse_a_nonce() {
        let store = ready_store().await;
        let mut seen = HashSet::new();

        for i in 0..500u32 {
            let model = Profile {
                name: format!("user-{i}"),
            };
            assert!(store.save("profile", &model).await);

            let stored = store.backend().get("profile").await.expect("get").expect("record");
            let envelope = Envelope::from_wire(&stored).expect("envelope");
            assert!(seen.insert(envelope.nonce), "nonce reused on save {i}");
        }
    }

    #[tokio::test]
    async fn flipped_ciphertext_bits_load_as_none() {
        let store = ready_store().await;
        assert!(store.save("profile", &ana()).await);
        let original = store.backend().get("profile").await.expect("get").expect("record");
        let envelope = Envelope::from_wire(&original).expect("envelope");

        for index in 0..envelope.ciphertext.len() {
            let mut tampered = envelope.clone();
            tampered.ciphertext[index] ^= 1 << (index % 8);
            store
                .backend()
                .set("profile", &tampered.to_wire().expect("encode"))
                .await
                .expect("tamper");

            let err = store.try_load::<Profile>("profile").await.expect_err("tampered");
            assert_eq!(err, StoreError::Cipher(CipherError::AuthenticationFailed));
            assert_eq!(store.load::<Profile>("profile").await, None);
        }

        store.backend().set("profile", &original).await.expect("restore");
        assert_eq!(store.load::<Profile>("profile").await, Some(ana()));
    }

    #[tokio::test]
    async fn malformed_records_load_as_none() {
        let store = ready_store().await;
        for raw in ["garbage", r#"{"iv":[1],"data":[]}"#, "{}"] {
            store.backend().set("profile", raw).await.expect("seed");
            assert_eq!(store.load::<Profile>("profile").await, None);
        }
    }

    #[tokio::test]
    async fn empty_record_is_no_value() {
        let store = ready_store().await;
        store.backend().set("profile", "").await.expect("seed");

        assert_eq!(store.try_load::<Profile>("profile").await, Ok(None));
        assert_eq!(store.load::<Profile>("profile").await, None);
    }

    #[tokio::test]
    async fn unknown_key_is_no_value() {
        let store = ready_store().await;
        assert_eq!(store.try_load::<Profile>("never-saved").await, Ok(None));
        assert_eq!(store.load::<Profile>("never-saved").await, None);
    }

    #[tokio::test]
    async fn schema_mismatch_is_no_value() {
        let store = ready_store().await;
        assert!(store.save("profile", &ana()).await);

        let err = store
            .try_load::<SignupForm>("profile")
            .await
            .expect_err("mismatch");
        assert!(matches!(err, StoreError::Codec(CodecError::Deserialize(_))));
        assert_eq!(store.load::<SignupForm>("profile").await, None);
    }

    #[tokio::test]
    async fn records_from_a_foreign_key_are_no_value() {
        let foreign = ready_store().await;
        assert!(foreign.save("profile", &ana()).await);
        let sealed = foreign.backend().get("profile").await.expect("get").expect("record");

        let store = ready_store().await;
        store.backend().set("profile", &sealed).await.expect("copy");
        assert_eq!(store.load::<Profile>("profile").await, None);
    }

    #[tokio::test]
    async fn save_and_load_before_initialize_report_key_not_ready() {
        let store = EncryptedStore::new(InMemoryBackend::new());

        let err = store.try_save("profile", &ana()).await.expect_err("not ready");
        assert_eq!(err, StoreError::Cipher(CipherError::KeyNotReady));
        assert!(err.is_misuse());
        assert!(!store.save("profile", &ana()).await);

        let err = store.try_load::<Profile>("profile").await.expect_err("not ready");
        assert_eq!(err, StoreError::Cipher(CipherError::KeyNotReady));
        assert_eq!(store.load::<Profile>("profile").await, None);
        assert!(store.backend().is_empty());
    }

    #[tokio::test]
    async fn remove_does_not_require_initialize() {
        let backend = InMemoryBackend::new();
        backend.set("profile", "sealed").await.expect("seed");
        let store = EncryptedStore::new(backend);

        assert!(!store.is_initialized());
        assert!(store.remove("profile").await);
        assert!(store.remove("profile").await);
        assert!(store.backend().get("profile").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn reserved_slot_is_off_limits() {
        let store = ready_store().await;
        let slot = store.backend().get(KEY_SLOT).await.expect("get");

        let err = store.try_save(KEY_SLOT, &ana()).await.expect_err("reserved");
        assert!(matches!(err, StoreError::ReservedKey { .. }));
        assert!(!store.save(KEY_SLOT, &ana()).await);
        assert_eq!(store.load::<String>(KEY_SLOT).await, None);
        assert!(!store.remove(KEY_SLOT).await);

        assert_eq!(store.backend().get(KEY_SLOT).await.expect("get"), slot);
    }

    #[tokio::test]
    async fn backend_failures_degrade_to_defaults() {
        let store = EncryptedStore::new(QuotaExceeded::default());
        store.initialize().await.expect("initialize");

        let err = store.try_save("profile", &ana()).await.expect_err("quota");
        assert!(matches!(err, StoreError::Backend(BackendError::Storage { .. })));
        assert!(!err.is_misuse());
        assert!(!store.save("profile", &ana()).await);
        assert!(!store.remove("profile").await);
        assert_eq!(store.load::<Profile>("profile").await, None);
    }

    #[tokio::test]
    async fn dispose_then_reinitialize_reads_old_records() {
        let mut store = ready_store().await;
        assert!(store.save("profile", &ana()).await);

        assert!(store.dispose());
        assert!(!store.is_initialized());
        assert_eq!(store.load::<Profile>("profile").await, None);

        store.initialize().await.expect("reinitialize");
        assert_eq!(store.load::<Profile>("profile").await, Some(ana()));
    }

    #[tokio::test]
    async fn file_store_accepts_empty_and_long_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedStore::new(FileBackend::new(dir.path()));
        store.initialize().await.expect("initialize");
        let long_key = "k".repeat(200);

        for key in ["", long_key.as_str()] {
            assert!(store.save(key, &ana()).await, "save key_len={}", key.len());
            assert_eq!(store.load::<Profile>(key).await, Some(ana()));
            assert!(store.remove(key).await);
            assert_eq!(store.load::<Profile>(key).await, None);
        }
    }

    #[tokio::test]
    async fn key_persists_across_sessions_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let first = EncryptedStore::new(FileBackend::new(dir.path()));
            first.initialize().await.expect("first session");
            assert!(first.save("profile", &ana()).await);
        }

        let second = EncryptedStore::new(FileBackend::new(dir.path()));
        second.initialize().await.expect("second session");
        assert_eq!(second.load::<Profile>("profile").await, Some(ana()));
    }

    #[tokio::test]
    async fn shared_backend_models_a_second_session() {
        let backend = Arc::new(InMemoryBackend::new());
        let first = EncryptedStore::from_shared(Arc::clone(&backend), JsonCodec);
        first.initialize().await.expect("first");
        assert!(first.save("profile", &ana()).await);

        let second = EncryptedStore::from_shared(backend, JsonCodec);
        second.initialize().await.expect("second");
        assert_eq!(second.load::<Profile>("profile").await, Some(ana()));
    }

    #[tokio::test]
    async fn initialize_surfaces_corrupt_key_slot() {
        let backend = InMemoryBackend::new();
        backend.set(KEY_SLOT, "%%%").await.expect("seed");
        let store = EncryptedStore::new(backend);

        let err = store.initialize().await.expect_err("corrupt slot");
        assert!(matches!(err, KeyInitializationError::Decode(_)));
        assert!(!store.is_initialized());
        assert!(!store.save("profile", &ana()).await);
    }
}
