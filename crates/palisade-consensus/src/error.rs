use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid quorum certificate: {0}")]
    InvalidQc(String),

    #[error("Invalid timeout certificate: {0}")]
    InvalidTc(String),

    #[error("Insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    #[error("Validator not found: {0}")]
    ValidatorNotFound(String),

    #[error("Sender mismatch: delivered by {delivered}, claimed {claimed}")]
    SenderMismatch { delivered: String, claimed: String },

    #[error("Genesis setup failed: {0}")]
    Genesis(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] palisade_ledger::LedgerError),

    #[error("Mempool error: {0}")]
    Mempool(#[from] palisade_mempool::MempoolError),

    #[error("Core error: {0}")]
    Core(#[from] palisade_core::CoreError),
}
