use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::decode_hex_array;
use crate::crypto::hash::Hash;
use crate::crypto::signature::Sig;
use crate::error::CoreError;

/// Ed25519 public key (32 bytes).
///
/// Doubles as the identity of replicas and clients; the validator set is
/// ordered by this key for round-robin leader selection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_hex_array(s)?
            .map(PublicKey)
            .ok_or(CoreError::InvalidPublicKey)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub(crate) fn verifying_key(&self) -> Result<VerifyingKey, CoreError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Ed25519 signing seed. Deliberately not `Serialize`; it only leaves the
/// process as hex in the node configuration.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    pub fn generate() -> Self {
        SecretKey(SigningKey::generate(&mut OsRng))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let seed: [u8; 32] = decode_hex_array(s)?.ok_or(CoreError::InvalidSecretKey)?;
        Ok(SecretKey(SigningKey::from_bytes(&seed)))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A replica's or client's signing identity.
///
/// Everything Palisade signs is a 32-byte digest of the message's signed
/// fields, so this is the only signing entry point.
#[derive(Clone)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::generate())
    }

    pub fn from_secret_hex(s: &str) -> Result<Self, CoreError> {
        Ok(Self::from_secret(SecretKey::from_hex(s)?))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        KeyPair { secret, public }
    }

    pub fn sign_digest(&self, digest: &Hash) -> Sig {
        use ed25519_dalek::Signer;
        Sig(self.secret.0.sign(digest.as_bytes()).to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_hex_roundtrip() {
        let kp = KeyPair::generate();
        let recovered = PublicKey::from_hex(&kp.public.to_hex()).unwrap();
        assert_eq!(kp.public, recovered);
        assert!(matches!(
            PublicKey::from_hex("00ff"),
            Err(CoreError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_secret_hex_restores_identity() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&kp.secret.to_hex()).unwrap();
        assert_eq!(kp.public, restored.public);
    }

    #[test]
    fn test_bad_secret_rejected() {
        assert!(matches!(
            KeyPair::from_secret_hex("abcd"),
            Err(CoreError::InvalidSecretKey)
        ));
        assert!(matches!(
            KeyPair::from_secret_hex("not hex"),
            Err(CoreError::HexDecode(_))
        ));
    }

    #[test]
    fn test_validator_order_follows_key_bytes() {
        let low = PublicKey([1u8; 32]);
        let high = PublicKey([2u8; 32]);
        assert!(low < high);
    }
}
