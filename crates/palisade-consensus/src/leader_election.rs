//! Reputation-based leader election with a round-robin fallback.

use std::collections::{BTreeMap, BTreeSet};

use palisade_core::{PublicKey, QuorumCertificate, Round};
use palisade_ledger::Ledger;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

pub struct LeaderElection {
    validators: Vec<PublicKey>,
    window_size: usize,
    exclude_size: usize,
    leader_history: usize,
    leaders: BTreeMap<Round, PublicKey>,
}

impl LeaderElection {
    pub fn new(
        mut validators: Vec<PublicKey>,
        window_size: usize,
        exclude_size: usize,
        leader_history: usize,
    ) -> Self {
        validators.sort();
        validators.dedup();
        LeaderElection {
            validators,
            window_size,
            exclude_size,
            leader_history,
            leaders: BTreeMap::new(),
        }
    }

    pub fn validators(&self) -> &[PublicKey] {
        &self.validators
    }

    pub fn round_robin_leader(&self, round: Round) -> PublicKey {
        let idx = ((round + 1) / 2) as usize % self.validators.len();
        self.validators[idx]
    }

    /// Cached leader for `round`, else its round-robin leader
    pub fn get_leader(&self, round: Round) -> PublicKey {
        self.leaders
            .get(&round)
            .copied()
            .unwrap_or_else(|| self.round_robin_leader(round))
    }

    /// Pin the leader of a round, overriding any election
    pub fn set_leader(&mut self, round: Round, leader: PublicKey) {
        self.leaders.insert(round, leader);
        self.evict();
    }

    /// Pick among validators that signed recent QCs, excluding recent
    /// leaders. Every replica walks the same committed history and seeds the
    /// same RNG, so all agree on the result.
    pub fn elect_reputation_leader(&self, qc: &QuorumCertificate, ledger: &Ledger) -> Option<PublicKey> {
        let mut active = BTreeSet::new();
        let mut recent = BTreeSet::new();
        let mut current = qc;
        let mut steps = 0;

        while steps < self.window_size || recent.len() < self.exclude_size {
            let parent_id = current.vote_info.parent_block_id?;
            let block = ledger.committed_block(&parent_id)?;
            if steps < self.window_size {
                active.extend(current.signers.iter().copied());
            }
            if recent.len() < self.exclude_size {
                recent.insert(block.author);
            }
            current = &block.high_qc;
            steps += 1;
        }

        let candidates: Vec<PublicKey> = active.difference(&recent).copied().collect();
        let mut rng = StdRng::seed_from_u64(qc.block_round());
        candidates.choose(&mut rng).copied()
    }

    /// Elect the leader of `current_round + 1` after processing `qc`.
    ///
    /// Reputation election only runs when `qc` extends its parent directly
    /// and certifies the round just before `current_round`. A non-contiguous
    /// `qc` does not force round-robin: a leader already cached for that
    /// round, elected by an earlier QC or pinned with [`Self::set_leader`], is
    /// kept, and the round-robin leader is cached only when none is.
    pub fn update_leaders(&mut self, qc: &QuorumCertificate, current_round: Round, ledger: &Ledger) {
        let next = current_round + 1;
        let contiguous = qc.parent_block_round().is_some_and(|p| p + 1 == qc.block_round())
            && qc.block_round() + 1 == current_round;

        if contiguous {
            match self.elect_reputation_leader(qc, ledger) {
                Some(leader) => {
                    info!("Reputation leader for round {}: {}", next, leader.short());
                    self.leaders.insert(next, leader);
                }
                None => {
                    let leader = self.round_robin_leader(next);
                    debug!("Not enough history, round-robin leader for round {}: {}", next, leader.short());
                    self.leaders.insert(next, leader);
                }
            }
        } else if !self.leaders.contains_key(&next) {
            let leader = self.round_robin_leader(next);
            debug!("Round-robin leader for round {}: {}", next, leader.short());
            self.leaders.insert(next, leader);
        }
        self.evict();
    }

    fn evict(&mut self) {
        while self.leaders.len() > self.leader_history {
            self.leaders.pop_first();
        }
    }

    pub fn num_cached(&self) -> usize {
        self.leaders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qc::VoteAggregator;
    use palisade_core::{Block, KeyPair, SyncMetadata, VoteInfo, VoteMsg};
    use palisade_ledger::{LedgerConfig, MemoryLog};

    fn certify(voters: &[KeyPair], block: &Block) -> QuorumCertificate {
        let info = VoteInfo {
            block_id: block.id,
            block_round: block.round,
            parent_block_id: Some(block.high_qc.block_id()),
            parent_block_round: Some(block.high_qc.block_round()),
            exec_state_id: Some(block.id),
        };
        let votes: Vec<VoteMsg> = voters
            .iter()
            .map(|v| VoteMsg::new(v, info.clone(), None, None, SyncMetadata::default()).unwrap())
            .collect();
        let mut aggregator = VoteAggregator::new(&votes[0]);
        for vote in &votes {
            aggregator.add(vote);
        }
        aggregator.form(&voters[0]).unwrap()
    }

    /// Four blocks in consecutive rounds, the first three committed
    fn history(vs: &[KeyPair]) -> (Ledger, QuorumCertificate, Vec<Block>) {
        let mut ledger = Ledger::new(Box::new(MemoryLog::new()), LedgerConfig::default()).unwrap();
        let mut qc = QuorumCertificate::genesis().unwrap();
        let mut blocks = Vec::new();
        for round in 1..=4u64 {
            let author = &vs[round as usize % vs.len()];
            let block = Block::new(author.public, round, vec![], qc).unwrap();
            qc = certify(&vs[..3], &block);
            blocks.push(block);
        }
        ledger.commit(blocks[..3].to_vec(), false).unwrap();
        (ledger, qc, blocks)
    }

    #[test]
    fn test_round_robin_pairs_rounds() {
        let vs: Vec<PublicKey> = (0..4).map(|_| KeyPair::generate().public).collect();
        let election = LeaderElection::new(vs.clone(), 2, 1, 8);
        let mut sorted = vs;
        sorted.sort();

        assert_eq!(election.get_leader(0), sorted[0]);
        assert_eq!(election.get_leader(1), sorted[1]);
        assert_eq!(election.get_leader(2), sorted[1]);
        assert_eq!(election.get_leader(3), sorted[2]);
        assert_eq!(election.get_leader(7), sorted[0]);
    }

    #[test]
    fn test_reputation_excludes_recent_author() {
        let vs: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let (ledger, qc4, blocks) = history(&vs);
        let election = LeaderElection::new(vs.iter().map(|v| v.public).collect(), 2, 1, 8);

        let leader = election.elect_reputation_leader(&qc4, &ledger).unwrap();
        assert_ne!(leader, blocks[2].author);
        assert!(qc4.signers.contains(&leader));
        // deterministic across replicas
        assert_eq!(election.elect_reputation_leader(&qc4, &ledger), Some(leader));
    }

    #[test]
    fn test_reputation_needs_history() {
        let vs: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let (_, qc4, _) = history(&vs);
        let empty = Ledger::new(Box::new(MemoryLog::new()), LedgerConfig::default()).unwrap();
        let election = LeaderElection::new(vs.iter().map(|v| v.public).collect(), 2, 1, 8);

        assert!(election.elect_reputation_leader(&qc4, &empty).is_none());
    }

    #[test]
    fn test_update_leaders_contiguous_uses_reputation() {
        let vs: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let (ledger, qc4, _) = history(&vs);
        let mut election = LeaderElection::new(vs.iter().map(|v| v.public).collect(), 2, 1, 8);

        election.update_leaders(&qc4, 5, &ledger);
        let expected = election.elect_reputation_leader(&qc4, &ledger).unwrap();
        assert_eq!(election.get_leader(6), expected);
    }

    #[test]
    fn test_fallback_keeps_elected_leader() {
        let vs: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let (ledger, qc4, _) = history(&vs);
        let mut election = LeaderElection::new(vs.iter().map(|v| v.public).collect(), 2, 1, 8);
        let pinned = vs[3].public;
        election.set_leader(5, pinned);

        // QC for round 4 seen while still in round 4
        election.update_leaders(&qc4, 4, &ledger);
        assert_eq!(election.get_leader(5), pinned);
    }

    #[test]
    fn test_cache_is_bounded() {
        let vs: Vec<PublicKey> = (0..4).map(|_| KeyPair::generate().public).collect();
        let mut election = LeaderElection::new(vs.clone(), 2, 1, 3);
        for round in 0..10 {
            election.set_leader(round, vs[0]);
        }
        assert_eq!(election.num_cached(), 3);
        // evicted rounds fall back to round-robin
        assert_eq!(election.get_leader(9), vs[0]);
    }
}
