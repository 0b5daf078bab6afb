use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log entry: {0}")]
    InvalidEntry(String),

    #[error("Log entry out of order: expected index {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("Invalid ledger configuration: {0}")]
    InvalidConfig(String),
}
