use ed25519_dalek::{Signature as DalekSignature, Verifier};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::fmt;

use crate::crypto::hash::Hash;
use crate::crypto::keys::PublicKey;
use crate::error::CoreError;

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sig(#[serde(with = "BigArray")] pub [u8; 64]);

impl Sig {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// All-zero placeholder; never verifies
impl Default for Sig {
    fn default() -> Self {
        Sig([0u8; 64])
    }
}

impl fmt::Debug for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig({}..)", hex::encode(&self.0[..8]))
    }
}

/// Check that `signer` signed `digest`
pub fn verify_digest(signer: &PublicKey, digest: &Hash, signature: &Sig) -> Result<(), CoreError> {
    signer
        .verifying_key()?
        .verify(digest.as_bytes(), &DalekSignature::from_bytes(&signature.0))
        .map_err(|_| CoreError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::hash_blake3;
    use crate::crypto::keys::KeyPair;

    #[test]
    fn test_sign_and_verify_digest() {
        let kp = KeyPair::generate();
        let digest = hash_blake3(b"vote");
        let sig = kp.sign_digest(&digest);
        assert!(verify_digest(&kp.public, &digest, &sig).is_ok());
    }

    #[test]
    fn test_other_digest_rejected() {
        let kp = KeyPair::generate();
        let sig = kp.sign_digest(&hash_blake3(b"round 3"));
        assert!(verify_digest(&kp.public, &hash_blake3(b"round 4"), &sig).is_err());
    }

    #[test]
    fn test_other_signer_rejected() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let digest = hash_blake3(b"proposal");
        let sig = kp1.sign_digest(&digest);
        assert!(verify_digest(&kp2.public, &digest, &sig).is_err());
    }

    #[test]
    fn test_placeholder_never_verifies() {
        let kp = KeyPair::generate();
        assert!(verify_digest(&kp.public, &Hash::ZERO, &Sig::default()).is_err());
    }
}
