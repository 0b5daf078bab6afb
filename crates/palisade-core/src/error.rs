use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid hash length")]
    InvalidHashLength,

    #[error("Identifier mismatch: {0}")]
    IdMismatch(&'static str),

    #[error("Transaction spans more than one line")]
    MultilineTransaction,

    #[error("Malformed certificate: {0}")]
    MalformedCertificate(&'static str),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
