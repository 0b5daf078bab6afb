use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MempoolError {
    #[error("Invalid mempool configuration: {0}")]
    InvalidConfig(String),
}
