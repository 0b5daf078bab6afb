use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Serialize to deterministic bincode bytes.
///
/// Every digest that is signed or compared across replicas is computed over
/// this encoding, so it must stay stable for a given value.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from bincode bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Serialize to JSON string (for RPC and config files)
pub fn to_json<T: Serialize>(value: &T) -> Result<String, CoreError> {
    serde_json::to_string(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Serialize to pretty JSON string
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String, CoreError> {
    serde_json::to_string_pretty(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from JSON string
pub fn from_json<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T, CoreError> {
    serde_json::from_str(json).map_err(|e| CoreError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncMetadata;

    #[test]
    fn test_metadata_bincode_is_stable() {
        let meta = SyncMetadata {
            branch: vec![4, 3, 1],
            log_index: 12,
            root_round: 1,
        };

        let bytes1 = to_bytes(&meta).unwrap();
        let bytes2 = to_bytes(&meta.clone()).unwrap();
        assert_eq!(bytes1, bytes2);

        let recovered: SyncMetadata = from_bytes(&bytes1).unwrap();
        assert_eq!(recovered, meta);
    }

    #[test]
    fn test_tuple_encoding_distinguishes_fields() {
        // (Some(x), y) and (None, y) must never collide on the wire
        let a = to_bytes(&(Some(7u64), 3u64)).unwrap();
        let b = to_bytes(&(None::<u64>, 3u64)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_json_rejects_garbage() {
        let result: Result<SyncMetadata, _> = from_json("{not json");
        assert!(matches!(result, Err(CoreError::Deserialization(_))));
    }
}
