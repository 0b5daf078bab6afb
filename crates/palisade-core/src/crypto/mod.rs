pub mod hash;
pub mod keys;
pub mod signature;

pub use hash::{digest, hash_blake3, Hash};
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use signature::{verify_digest, Sig};

/// Decode hex into a fixed-width array; `None` on a length mismatch
pub(crate) fn decode_hex_array<const N: usize>(s: &str) -> Result<Option<[u8; N]>, hex::FromHexError> {
    Ok(hex::decode(s)?.try_into().ok())
}
