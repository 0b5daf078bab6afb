use serde::{Deserialize, Serialize};

use crate::crypto::{digest, hash_blake3, Hash, PublicKey};
use crate::error::CoreError;
use crate::types::certificate::QuorumCertificate;
use crate::types::client::ClientRequest;
use crate::types::Round;

/// Fixed identifier of the genesis block
pub fn genesis_block_id() -> Hash {
    hash_blake3(b"palisade/genesis")
}

/// A proposed batch of client requests chained to its parent by `high_qc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub round: Round,
    pub author: PublicKey,
    pub payload: Vec<ClientRequest>,
    /// Certificate of the parent block
    pub high_qc: QuorumCertificate,
    pub id: Hash,
}

impl Block {
    pub fn new(
        author: PublicKey,
        round: Round,
        payload: Vec<ClientRequest>,
        high_qc: QuorumCertificate,
    ) -> Result<Self, CoreError> {
        let id = Self::compute_id(&author, round, &payload, &high_qc)?;
        Ok(Block {
            round,
            author,
            payload,
            high_qc,
            id,
        })
    }

    /// Genesis has an empty payload and is certified by the genesis QC.
    pub fn genesis(author: PublicKey) -> Result<Self, CoreError> {
        Ok(Block {
            round: 0,
            author,
            payload: Vec::new(),
            high_qc: QuorumCertificate::genesis()?,
            id: genesis_block_id(),
        })
    }

    fn compute_id(
        author: &PublicKey,
        round: Round,
        payload: &[ClientRequest],
        high_qc: &QuorumCertificate,
    ) -> Result<Hash, CoreError> {
        digest(&(author, round, payload, high_qc))
    }

    pub fn is_genesis(&self) -> bool {
        self.round == 0 && self.id == genesis_block_id()
    }

    /// Round of the block this one extends
    pub fn parent_round(&self) -> Round {
        self.high_qc.block_round()
    }

    /// Recompute the id and compare it with the one carried
    pub fn verify_id(&self) -> Result<(), CoreError> {
        if self.is_genesis() {
            return Ok(());
        }
        let expected = Self::compute_id(&self.author, self.round, &self.payload, &self.high_qc)?;
        if expected != self.id {
            return Err(CoreError::IdMismatch("block id"));
        }
        Ok(())
    }

    pub fn transactions(&self) -> impl Iterator<Item = &str> {
        self.payload.iter().map(|req| req.transaction.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn test_block_id_covers_payload() {
        let leader = KeyPair::generate();
        let client = KeyPair::generate();
        let qc = QuorumCertificate::genesis().unwrap();
        let req = ClientRequest::new(&client, "put x 1".to_string()).unwrap();

        let empty = Block::new(leader.public, 1, vec![], qc.clone()).unwrap();
        let full = Block::new(leader.public, 1, vec![req], qc).unwrap();
        assert_ne!(empty.id, full.id);
        assert!(full.verify_id().is_ok());
        assert_eq!(full.parent_round(), 0);
    }

    #[test]
    fn test_forged_block_id_detected() {
        let leader = KeyPair::generate();
        let mut block = Block::new(leader.public, 3, vec![], QuorumCertificate::genesis().unwrap()).unwrap();
        block.round = 4;
        assert!(block.verify_id().is_err());
    }

    #[test]
    fn test_genesis_block() {
        let leader = KeyPair::generate();
        let genesis = Block::genesis(leader.public).unwrap();
        assert!(genesis.is_genesis());
        assert!(genesis.high_qc.is_genesis());
        assert_eq!(genesis.transactions().count(), 0);
    }
}
