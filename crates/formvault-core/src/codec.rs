use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("serialize failed: {0}")]
    Serialize(String),
    #[error("deserialize failed: {0}")]
    Deserialize(String),
}

/// Turns caller models into the text payload that gets encrypted, and back.
pub trait ModelCodec: Send + Sync {
    fn serialize<T: Serialize + ?Sized>(&self, model: &T) -> Result<String, CodecError>;

    fn deserialize<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CodecError>;
}

/// Default codec: compact JSON via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl ModelCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, model: &T) -> Result<String, CodecError> {
        serde_json::to_string(model).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CodecError> {
        serde_json::from_str(payload).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}
