use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};

use crate::{error::CipherError, key_manager::KeyHandle};

/// AES-GCM nonce length (96 bits).
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length, appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Stored unit of ciphertext. Wire form is `{"iv":[..],"data":[..]}` with both
/// fields as arrays of byte values; `data` carries the tag at its end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(rename = "iv")]
    pub nonce: [u8; NONCE_LEN],
    #[serde(rename = "data")]
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn to_wire(&self) -> Result<String, CipherError> {
        serde_json::to_string(self).map_err(|e| CipherError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_wire(raw: &str) -> Result<Self, CipherError> {
        serde_json::from_str(raw).map_err(|e| CipherError::MalformedEnvelope(e.to_string()))
    }
}

/// Authenticated encryption of opaque payloads under a [`KeyHandle`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CipherService;

impl CipherService {
    /// Encrypt under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8], key: &KeyHandle) -> Result<Envelope, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = key
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce.as_slice());
        Ok(Envelope {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Decrypt and verify. All-or-nothing: any tag mismatch yields
    /// `AuthenticationFailed` and no plaintext.
    pub fn open(&self, envelope: &Envelope, key: &KeyHandle) -> Result<Vec<u8>, CipherError> {
        if envelope.ciphertext.len() < TAG_LEN {
            return Err(CipherError::MalformedEnvelope(format!(
                "ciphertext shorter than {TAG_LEN}-byte tag"
            )));
        }

        key.cipher()
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_ref())
            .map_err(|_| CipherError::AuthenticationFailed)
    }
}
