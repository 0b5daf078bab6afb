use serde::{Deserialize, Serialize};

use crate::crypto::{digest, verify_digest, Hash, KeyPair, PublicKey, Sig};
use crate::error::CoreError;
use crate::types::block::genesis_block_id;
use crate::types::message::timeout_digest;
use crate::types::Round;

/// The block a vote is about, together with its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    pub block_id: Hash,
    pub block_round: Round,
    /// Absent only for genesis
    pub parent_block_id: Option<Hash>,
    pub parent_block_round: Option<Round>,
    pub exec_state_id: Option<Hash>,
}

impl VoteInfo {
    pub fn hash(&self) -> Result<Hash, CoreError> {
        digest(self)
    }
}

/// Digest signed by voters and used to index votes during aggregation.
pub fn vote_digest(commit_state_id: &Option<Hash>, vote_info_hash: &Hash) -> Result<Hash, CoreError> {
    digest(&(commit_state_id, vote_info_hash))
}

/// Quorum certificate: 2f+1 matching votes on the same `VoteInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub vote_info: VoteInfo,
    /// Set only when the certified block directly extends its parent's QC
    pub commit_state_id: Option<Hash>,
    pub vote_info_hash: Hash,
    pub signatures: Vec<Sig>,
    /// Aligned with `signatures`
    pub signers: Vec<PublicKey>,
    /// Replica that aggregated the votes (absent for genesis)
    pub formed_by: Option<PublicKey>,
    /// `formed_by`'s signature over the digest of `signatures`
    pub signature: Option<Sig>,
}

impl QuorumCertificate {
    /// The bootstrap certificate for the genesis block. Carries no signatures.
    pub fn genesis() -> Result<Self, CoreError> {
        let vote_info = VoteInfo {
            block_id: genesis_block_id(),
            block_round: 0,
            parent_block_id: None,
            parent_block_round: None,
            exec_state_id: None,
        };
        let vote_info_hash = vote_info.hash()?;
        Ok(QuorumCertificate {
            vote_info,
            commit_state_id: None,
            vote_info_hash,
            signatures: Vec::new(),
            signers: Vec::new(),
            formed_by: None,
            signature: None,
        })
    }

    /// Aggregate collected vote signatures into a signed certificate.
    pub fn form(
        vote_info: VoteInfo,
        commit_state_id: Option<Hash>,
        signatures: Vec<Sig>,
        signers: Vec<PublicKey>,
        former: &KeyPair,
    ) -> Result<Self, CoreError> {
        if signatures.len() != signers.len() {
            return Err(CoreError::MalformedCertificate("signers and signatures differ in length"));
        }
        let vote_info_hash = vote_info.hash()?;
        let signature = former.sign_digest(&digest(&signatures)?);
        Ok(QuorumCertificate {
            vote_info,
            commit_state_id,
            vote_info_hash,
            signatures,
            signers,
            formed_by: Some(former.public),
            signature: Some(signature),
        })
    }

    pub fn is_genesis(&self) -> bool {
        self.vote_info.block_round == 0
            && self.vote_info.parent_block_id.is_none()
            && self.vote_info.block_id == genesis_block_id()
    }

    pub fn block_id(&self) -> Hash {
        self.vote_info.block_id
    }

    pub fn block_round(&self) -> Round {
        self.vote_info.block_round
    }

    pub fn parent_block_round(&self) -> Option<Round> {
        self.vote_info.parent_block_round
    }

    /// Digest every signer signed
    pub fn vote_digest(&self) -> Result<Hash, CoreError> {
        vote_digest(&self.commit_state_id, &self.vote_info_hash)
    }

    /// Check the internal consistency and every signature carried.
    ///
    /// Membership and quorum size are checked by the consensus layer, which
    /// knows the validator set.
    pub fn verify_signatures(&self) -> Result<(), CoreError> {
        if self.is_genesis() {
            return if self.signatures.is_empty() {
                Ok(())
            } else {
                Err(CoreError::MalformedCertificate("genesis certificate carries signatures"))
            };
        }
        if self.vote_info.hash()? != self.vote_info_hash {
            return Err(CoreError::IdMismatch("vote_info_hash"));
        }
        if self.signatures.len() != self.signers.len() {
            return Err(CoreError::MalformedCertificate("signers and signatures differ in length"));
        }
        let (former, signature) = match (&self.formed_by, &self.signature) {
            (Some(former), Some(signature)) => (former, signature),
            _ => return Err(CoreError::MalformedCertificate("missing aggregator signature")),
        };
        verify_digest(former, &digest(&self.signatures)?, signature)?;

        let vote = self.vote_digest()?;
        for (signer, sig) in self.signers.iter().zip(&self.signatures) {
            verify_digest(signer, &vote, sig)?;
        }
        Ok(())
    }
}

/// Timeout certificate: 2f+1 timeout messages for the same round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCertificate {
    pub current_round: Round,
    /// `high_qc` round reported by each signer, aligned with `signers`
    pub high_qc_rounds: Vec<Round>,
    pub signatures: Vec<Sig>,
    pub signers: Vec<PublicKey>,
    pub formed_by: PublicKey,
    pub signature: Sig,
}

impl TimeoutCertificate {
    pub fn form(
        current_round: Round,
        high_qc_rounds: Vec<Round>,
        signatures: Vec<Sig>,
        signers: Vec<PublicKey>,
        former: &KeyPair,
    ) -> Result<Self, CoreError> {
        if signatures.len() != signers.len() || high_qc_rounds.len() != signers.len() {
            return Err(CoreError::MalformedCertificate("timeout certificate fields misaligned"));
        }
        let signature = former.sign_digest(&digest(&signatures)?);
        Ok(TimeoutCertificate {
            current_round,
            high_qc_rounds,
            signatures,
            signers,
            formed_by: former.public,
            signature,
        })
    }

    /// Largest `high_qc` round any signer reported
    pub fn max_high_qc_round(&self) -> Round {
        self.high_qc_rounds.iter().copied().max().unwrap_or(0)
    }

    pub fn verify_signatures(&self) -> Result<(), CoreError> {
        if self.signatures.len() != self.signers.len()
            || self.high_qc_rounds.len() != self.signers.len()
        {
            return Err(CoreError::MalformedCertificate("timeout certificate fields misaligned"));
        }
        verify_digest(&self.formed_by, &digest(&self.signatures)?, &self.signature)?;
        for ((signer, sig), high_qc_round) in self
            .signers
            .iter()
            .zip(&self.signatures)
            .zip(&self.high_qc_rounds)
        {
            let timeout = timeout_digest(self.current_round, *high_qc_round)?;
            verify_digest(signer, &timeout, sig)?;
        }
        Ok(())
    }
}
