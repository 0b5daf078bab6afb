use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::decode_hex_array;
use crate::error::CoreError;
use crate::serialize;

/// A 32-byte Blake3 hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn new(data: [u8; 32]) -> Self {
        Hash(data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_hex_array(s)?
            .map(Hash)
            .ok_or(CoreError::InvalidHashLength)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, used in log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute Blake3 hash of data
pub fn hash_blake3(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash(*hash.as_bytes())
}

/// Hash the bincode encoding of a value.
///
/// Block ids, vote digests and every signed payload go through here.
pub fn digest<T: Serialize + ?Sized>(value: &T) -> Result<Hash, CoreError> {
    let bytes = serialize::to_bytes(value)?;
    Ok(hash_blake3(&bytes))
}
