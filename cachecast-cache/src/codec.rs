//! Value codecs.

use crate::error::{CacheError, CacheResult};
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

/// Turns application values into the opaque bytes kept in the store and back.
pub trait Codec: Send + Sync + 'static {
    /// Encode a value.
    fn encode<T: Serialize>(&self, value: &T) -> CacheResult<Bytes>;

    /// Decode a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> CacheResult<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Product {
        id: u32,
        name: String,
    }

    #[test]
    fn test_json_codec() {
        let product = Product {
            id: 7,
            name: "Lamp".into(),
        };
        let bytes = JsonCodec.encode(&product).unwrap();
        let decoded: Product = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, product);
    }

    #[test]
    fn test_decode_wrong_type() {
        let bytes = JsonCodec.encode(&"just a string").unwrap();
        let err = JsonCodec.decode::<Product>(&bytes).unwrap_err();
        assert!(matches!(err, CacheError::Deserialization(_)));
    }
}
