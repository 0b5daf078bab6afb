use serde::{Deserialize, Serialize};

use crate::crypto::{digest, verify_digest, Hash, KeyPair, PublicKey, Sig};
use crate::error::CoreError;
use crate::types::block::Block;
use crate::types::Round;

/// Snapshot of the sender's chain attached to votes, timeouts and proposals,
/// used by receivers to detect that they lag behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Rounds from the sender's high QC block down to its root, descending
    pub branch: Vec<Round>,
    /// Number of transactions in the sender's ledger
    pub log_index: u64,
    pub root_round: Round,
}

/// A committed ledger line with its position in the log
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub command: String,
}

/// A block recovered during sync-up, with the rounds of its known children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedBlock {
    pub block: Block,
    pub children_rounds: Vec<Round>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequestData {
    pub missing_rounds: Vec<Round>,
    pub log_index: u64,
    pub root_round: Round,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub id: Hash,
    pub data: SyncRequestData,
    pub sender: PublicKey,
    pub signature: Sig,
}

impl SyncRequest {
    pub fn new(replica: &KeyPair, data: SyncRequestData) -> Result<Self, CoreError> {
        let data_digest = digest(&data)?;
        Ok(SyncRequest {
            id: digest(&(replica.public, data_digest))?,
            signature: replica.sign_digest(&data_digest),
            data,
            sender: replica.public,
        })
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        verify_digest(&self.sender, &digest(&self.data)?, &self.signature)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponseData {
    pub missing_blocks: Vec<SyncedBlock>,
    pub log_chunk: Vec<LogEntry>,
}

impl SyncResponseData {
    pub fn is_empty(&self) -> bool {
        self.missing_blocks.is_empty() && self.log_chunk.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub request_id: Hash,
    pub data: SyncResponseData,
    pub sender: PublicKey,
    pub signature: Sig,
}

impl SyncResponse {
    pub fn new(replica: &KeyPair, request_id: Hash, data: SyncResponseData) -> Result<Self, CoreError> {
        let signature = replica.sign_digest(&digest(&data)?);
        Ok(SyncResponse {
            request_id,
            data,
            sender: replica.public,
            signature,
        })
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        verify_digest(&self.sender, &digest(&self.data)?, &self.signature)
    }
}
