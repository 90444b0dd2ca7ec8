//! Collaborator contracts for formvault: the string key-value backend and the
//! model codec. No cryptography lives here; see `formvault-storage`.

pub mod backend;
pub mod codec;

pub use backend::{BackendError, InMemoryBackend, StorageBackend};
pub use codec::{CodecError, JsonCodec, ModelCodec};
