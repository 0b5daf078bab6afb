use std::collections::HashSet;

use palisade_core::{
    Hash, KeyPair, PublicKey, QuorumCertificate, Round, Sig, TimeoutCertificate, TimeoutMsg,
    VoteInfo, VoteMsg,
};
use tracing::debug;

use crate::error::ConsensusError;

/// Collects matching votes for one `(commit_state_id, vote_info_hash)` digest
#[derive(Debug, Clone)]
pub struct VoteAggregator {
    vote_info: VoteInfo,
    commit_state_id: Option<Hash>,
    signatures: Vec<Sig>,
    signers: Vec<PublicKey>,
}

impl VoteAggregator {
    pub fn new(vote: &VoteMsg) -> Self {
        VoteAggregator {
            vote_info: vote.vote_info.clone(),
            commit_state_id: vote.commit_state_id,
            signatures: Vec::new(),
            signers: Vec::new(),
        }
    }

    /// Add a vote; returns false if its sender was already counted
    pub fn add(&mut self, vote: &VoteMsg) -> bool {
        if self.signers.contains(&vote.sender) {
            debug!("Duplicate vote from {}", vote.sender.short());
            return false;
        }
        self.signatures.push(vote.signature);
        self.signers.push(vote.sender);
        true
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Build the certificate from every vote collected so far
    pub fn form(&self, former: &KeyPair) -> Result<QuorumCertificate, ConsensusError> {
        Ok(QuorumCertificate::form(
            self.vote_info.clone(),
            self.commit_state_id,
            self.signatures.clone(),
            self.signers.clone(),
            former,
        )?)
    }
}

/// Collects timeout messages for one round, one per sender
#[derive(Debug, Clone)]
pub struct TimeoutAggregator {
    round: Round,
    high_qc_rounds: Vec<Round>,
    signatures: Vec<Sig>,
    signers: Vec<PublicKey>,
}

impl TimeoutAggregator {
    pub fn new(round: Round) -> Self {
        TimeoutAggregator {
            round,
            high_qc_rounds: Vec::new(),
            signatures: Vec::new(),
            signers: Vec::new(),
        }
    }

    /// Add a timeout; returns false if its sender was already counted
    pub fn add(&mut self, msg: &TimeoutMsg) -> bool {
        if msg.current_round != self.round || self.signers.contains(&msg.sender) {
            return false;
        }
        self.high_qc_rounds.push(msg.high_qc.block_round());
        self.signatures.push(msg.signature);
        self.signers.push(msg.sender);
        true
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn form(&self, former: &KeyPair) -> Result<TimeoutCertificate, ConsensusError> {
        Ok(TimeoutCertificate::form(
            self.round,
            self.high_qc_rounds.clone(),
            self.signatures.clone(),
            self.signers.clone(),
            former,
        )?)
    }
}

fn check_signers(
    signers: &[PublicKey],
    validators: &HashSet<PublicKey>,
    quorum: usize,
) -> Result<(), ConsensusError> {
    let mut distinct = HashSet::with_capacity(signers.len());
    for signer in signers {
        if !validators.contains(signer) {
            return Err(ConsensusError::ValidatorNotFound(signer.to_hex()));
        }
        if !distinct.insert(signer) {
            return Err(ConsensusError::InvalidQc(format!("duplicate signer {}", signer.short())));
        }
    }
    if distinct.len() < quorum {
        return Err(ConsensusError::InsufficientSignatures {
            have: distinct.len(),
            need: quorum,
        });
    }
    Ok(())
}

/// Verify a quorum certificate against the validator set
pub fn verify_qc(
    qc: &QuorumCertificate,
    validators: &HashSet<PublicKey>,
    quorum: usize,
) -> Result<(), ConsensusError> {
    if qc.is_genesis() {
        if *qc != QuorumCertificate::genesis()? {
            return Err(ConsensusError::InvalidQc("altered genesis certificate".to_string()));
        }
        return Ok(());
    }

    check_signers(&qc.signers, validators, quorum)?;
    match &qc.formed_by {
        Some(former) if validators.contains(former) => {}
        Some(former) => return Err(ConsensusError::ValidatorNotFound(former.to_hex())),
        None => return Err(ConsensusError::InvalidQc("missing aggregator".to_string())),
    }
    qc.verify_signatures()?;
    Ok(())
}

/// Verify a timeout certificate against the validator set
pub fn verify_tc(
    tc: &TimeoutCertificate,
    validators: &HashSet<PublicKey>,
    quorum: usize,
) -> Result<(), ConsensusError> {
    check_signers(&tc.signers, validators, quorum)
        .map_err(|e| ConsensusError::InvalidTc(e.to_string()))?;
    if !validators.contains(&tc.formed_by) {
        return Err(ConsensusError::ValidatorNotFound(tc.formed_by.to_hex()));
    }
    tc.verify_signatures()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::{genesis_block_id, hash_blake3, SyncMetadata};

    fn validator_keys(n: usize) -> Vec<KeyPair> {
        (0..n).map(|_| KeyPair::generate()).collect()
    }

    fn validator_set(validators: &[KeyPair]) -> HashSet<PublicKey> {
        validators.iter().map(|v| v.public).collect()
    }

    fn vote(voter: &KeyPair) -> VoteMsg {
        let info = VoteInfo {
            block_id: hash_blake3(b"block"),
            block_round: 1,
            parent_block_id: Some(genesis_block_id()),
            parent_block_round: Some(0),
            exec_state_id: Some(hash_blake3(b"block")),
        };
        VoteMsg::new(voter, info, None, None, SyncMetadata::default()).unwrap()
    }

    fn timeout(sender: &KeyPair, round: Round) -> TimeoutMsg {
        TimeoutMsg::new(
            sender,
            round,
            QuorumCertificate::genesis().unwrap(),
            None,
            None,
            SyncMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_vote_aggregator_dedups_senders() {
        let validators = validator_keys(4);
        let mut aggregator = VoteAggregator::new(&vote(&validators[0]));

        assert!(aggregator.add(&vote(&validators[0])));
        assert!(!aggregator.add(&vote(&validators[0])));
        assert!(aggregator.add(&vote(&validators[1])));
        assert_eq!(aggregator.len(), 2);
    }

    #[test]
    fn test_formed_qc_passes_verification() {
        let validators = validator_keys(4);
        let set = validator_set(&validators);
        let mut aggregator = VoteAggregator::new(&vote(&validators[0]));
        for v in &validators[..3] {
            aggregator.add(&vote(v));
        }

        let qc = aggregator.form(&validators[3]).unwrap();
        verify_qc(&qc, &set, 3).unwrap();
    }

    #[test]
    fn test_qc_below_quorum_rejected() {
        let validators = validator_keys(4);
        let set = validator_set(&validators);
        let mut aggregator = VoteAggregator::new(&vote(&validators[0]));
        for v in &validators[..2] {
            aggregator.add(&vote(v));
        }

        let qc = aggregator.form(&validators[0]).unwrap();
        let result = verify_qc(&qc, &set, 3);
        assert!(matches!(result, Err(ConsensusError::InsufficientSignatures { have: 2, need: 3 })));
    }

    #[test]
    fn test_qc_from_outsider_rejected() {
        let validators = validator_keys(4);
        let set = validator_set(&validators);
        let outsider = KeyPair::generate();
        let mut aggregator = VoteAggregator::new(&vote(&validators[0]));
        for v in validators[..2].iter().chain(std::iter::once(&outsider)) {
            aggregator.add(&vote(v));
        }

        let qc = aggregator.form(&validators[0]).unwrap();
        assert!(matches!(verify_qc(&qc, &set, 3), Err(ConsensusError::ValidatorNotFound(_))));
    }

    #[test]
    fn test_qc_with_repeated_signer_rejected() {
        let validators = validator_keys(4);
        let set = validator_set(&validators);
        let v = vote(&validators[0]);
        let qc = QuorumCertificate::form(
            v.vote_info.clone(),
            None,
            vec![v.signature; 3],
            vec![validators[0].public; 3],
            &validators[0],
        )
        .unwrap();

        assert!(matches!(verify_qc(&qc, &set, 3), Err(ConsensusError::InvalidQc(_))));
    }

    #[test]
    fn test_altered_genesis_rejected() {
        let set = validator_set(&validator_keys(4));
        let mut qc = QuorumCertificate::genesis().unwrap();
        verify_qc(&qc, &set, 3).unwrap();

        qc.commit_state_id = Some(hash_blake3(b"forged"));
        assert!(verify_qc(&qc, &set, 3).is_err());
    }

    #[test]
    fn test_timeout_aggregator_and_tc() {
        let validators = validator_keys(4);
        let set = validator_set(&validators);
        let mut aggregator = TimeoutAggregator::new(5);

        assert!(!aggregator.add(&timeout(&validators[0], 4)));
        for v in &validators[..3] {
            assert!(aggregator.add(&timeout(v, 5)));
        }
        assert!(!aggregator.add(&timeout(&validators[1], 5)));

        let tc = aggregator.form(&validators[0]).unwrap();
        assert_eq!(tc.signers.len(), 3);
        assert_eq!(tc.max_high_qc_round(), 0);
        verify_tc(&tc, &set, 3).unwrap();
    }
}
