//! Voting and timeout safety rules.
//!
//! A replica never votes twice in a round, never votes below its certified
//! height, and never times out a round it already left.

use palisade_core::{
    Block, Hash, KeyPair, QuorumCertificate, Round, SyncMetadata, TimeoutCertificate, TimeoutMsg,
    VoteInfo, VoteMsg,
};
use tracing::debug;

use crate::error::ConsensusError;

pub struct Safety {
    keypair: KeyPair,
    highest_vote_round: Round,
    high_qc_round: Round,
}

impl Safety {
    pub fn new(keypair: KeyPair) -> Self {
        Safety {
            keypair,
            highest_vote_round: 0,
            high_qc_round: 0,
        }
    }

    pub fn highest_vote_round(&self) -> Round {
        self.highest_vote_round
    }

    pub fn high_qc_round(&self) -> Round {
        self.high_qc_round
    }

    /// After a TC the leader may extend a QC only if it is at least as high
    /// as every QC the TC's signers reported.
    fn safe_to_extend(block_round: Round, qc_round: Round, tc: Option<&TimeoutCertificate>) -> bool {
        tc.is_some_and(|tc| tc.current_round + 1 == block_round && qc_round >= tc.max_high_qc_round())
    }

    fn safe_to_vote(&self, block_round: Round, qc_round: Round, tc: Option<&TimeoutCertificate>) -> bool {
        if block_round <= self.highest_vote_round.max(qc_round) {
            return false;
        }
        qc_round + 1 == block_round || Self::safe_to_extend(block_round, qc_round, tc)
    }

    fn safe_to_timeout(&self, round: Round, qc_round: Round, tc: Option<&TimeoutCertificate>) -> bool {
        if qc_round < self.high_qc_round
            || round <= self.highest_vote_round.saturating_sub(1).max(qc_round)
        {
            return false;
        }
        qc_round + 1 == round || tc.is_some_and(|tc| tc.current_round + 1 == round)
    }

    /// The block a QC for `block_round` would commit: the QC's own block when
    /// the two rounds are consecutive.
    pub fn determine_commit_state(block_round: Round, qc: &QuorumCertificate) -> Option<Hash> {
        if qc.block_round() + 1 == block_round && !qc.is_genesis() {
            Some(qc.block_id())
        } else {
            None
        }
    }

    /// Vote for `block` if the safety rules allow it
    pub fn make_vote(
        &mut self,
        block: &Block,
        last_tc: Option<&TimeoutCertificate>,
        exec_state_id: Hash,
        high_commit_qc: &QuorumCertificate,
        meta: SyncMetadata,
    ) -> Result<Option<VoteMsg>, ConsensusError> {
        let qc_round = block.high_qc.block_round();
        if !self.safe_to_vote(block.round, qc_round, last_tc) {
            debug!(
                "Not safe to vote for block {} (round {}, qc round {}, highest vote {})",
                block.id.short(),
                block.round,
                qc_round,
                self.highest_vote_round
            );
            return Ok(None);
        }

        self.high_qc_round = self.high_qc_round.max(qc_round);
        self.highest_vote_round = self.highest_vote_round.max(block.round);

        let vote_info = VoteInfo {
            block_id: block.id,
            block_round: block.round,
            parent_block_id: Some(block.high_qc.block_id()),
            parent_block_round: Some(qc_round),
            exec_state_id: Some(exec_state_id),
        };
        let high_commit_qc = (!block.high_qc.is_genesis()).then(|| high_commit_qc.clone());
        let vote = VoteMsg::new(
            &self.keypair,
            vote_info,
            Self::determine_commit_state(block.round, &block.high_qc),
            high_commit_qc,
            meta,
        )?;
        Ok(Some(vote))
    }

    /// Time out `round` if the safety rules allow it; stops voting in it
    pub fn make_timeout(
        &mut self,
        round: Round,
        high_qc: &QuorumCertificate,
        last_tc: Option<&TimeoutCertificate>,
        high_commit_qc: &QuorumCertificate,
        meta: SyncMetadata,
    ) -> Result<Option<TimeoutMsg>, ConsensusError> {
        if !self.safe_to_timeout(round, high_qc.block_round(), last_tc) {
            debug!("Not safe to time out round {}", round);
            return Ok(None);
        }

        self.highest_vote_round = self.highest_vote_round.max(round);
        let msg = TimeoutMsg::new(
            &self.keypair,
            round,
            high_qc.clone(),
            last_tc.cloned(),
            Some(high_commit_qc.clone()),
            meta,
        )?;
        Ok(Some(msg))
    }
}
