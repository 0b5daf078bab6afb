//! Palisade Core - Wire types, cryptography, and serialization
//!
//! This crate provides the foundational types shared by every Palisade
//! replica: blocks, certificates, protocol messages and the hash/sign/verify
//! contract they are authenticated with.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{
    digest, hash_blake3, verify_digest, Hash, KeyPair, PublicKey, SecretKey, Sig,
};
pub use error::CoreError;
pub use types::*;
