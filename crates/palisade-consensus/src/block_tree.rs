//! Speculative tree of uncommitted blocks rooted at the last committed block.
//!
//! Nodes are kept in an arena keyed by round; each round holds at most one
//! block. Committing a block makes it the new root and prunes every branch
//! that does not descend from it.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use palisade_core::{
    Block, ClientRequest, Hash, KeyPair, PublicKey, QuorumCertificate, Round, SyncMetadata,
    SyncedBlock, VoteMsg,
};
use palisade_ledger::{CommitReceipt, Ledger};
use palisade_mempool::Mempool;
use tracing::{debug, info, trace, warn};

use crate::error::ConsensusError;
use crate::qc::VoteAggregator;

#[derive(Debug, Clone)]
pub struct BlockTreeNode {
    pub block: Block,
    pub parent_round: Round,
    pub children_rounds: BTreeSet<Round>,
}

/// State a commit writes through
pub struct CommitContext<'a> {
    pub ledger: &'a mut Ledger,
    pub mempool: &'a mut Mempool,
    /// Queue commits instead of writing them (sync-up in progress)
    pub hold_back: bool,
}

/// Outcome of processing one vote
#[derive(Debug, Default)]
pub struct VoteOutcome {
    /// Receipts produced by the vote's piggybacked `high_commit_qc`
    pub receipts: Vec<CommitReceipt>,
    pub qc: Option<QuorumCertificate>,
}

pub struct BlockTree {
    nodes: HashMap<Round, BlockTreeNode>,
    rounds_by_id: HashMap<Hash, Round>,
    root_round: Round,
    high_qc: QuorumCertificate,
    high_commit_qc: QuorumCertificate,
    pending_votes: HashMap<Hash, VoteAggregator>,
    quorum: usize,
}

impl BlockTree {
    /// A tree holding only `genesis` as its root
    pub fn new(genesis: Block, genesis_qc: QuorumCertificate, quorum: usize) -> Self {
        let mut tree = BlockTree {
            nodes: HashMap::new(),
            rounds_by_id: HashMap::new(),
            root_round: genesis.round,
            high_qc: genesis_qc.clone(),
            high_commit_qc: genesis_qc,
            pending_votes: HashMap::new(),
            quorum,
        };
        tree.rounds_by_id.insert(genesis.id, genesis.round);
        tree.nodes.insert(
            genesis.round,
            BlockTreeNode {
                parent_round: genesis.round,
                block: genesis,
                children_rounds: BTreeSet::new(),
            },
        );
        tree
    }

    pub fn root_round(&self) -> Round {
        self.root_round
    }

    pub fn root(&self) -> Option<&Block> {
        self.nodes.get(&self.root_round).map(|n| &n.block)
    }

    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.high_qc
    }

    pub fn high_commit_qc(&self) -> &QuorumCertificate {
        &self.high_commit_qc
    }

    pub fn node(&self, round: Round) -> Option<&BlockTreeNode> {
        self.nodes.get(&round)
    }

    pub fn contains_round(&self, round: Round) -> bool {
        self.nodes.contains_key(&round)
    }

    pub fn contains_block(&self, id: &Hash) -> bool {
        self.rounds_by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Leader side: a block extending the highest certified block
    pub fn generate_block(
        &self,
        author: PublicKey,
        round: Round,
        payload: Vec<ClientRequest>,
    ) -> Result<Block, ConsensusError> {
        Ok(Block::new(author, round, payload, self.high_qc.clone())?)
    }

    /// Speculatively execute `block` and insert it
    pub fn execute_and_insert(&mut self, block: Block, ledger: &Ledger) -> bool {
        let exec_state_id = ledger.speculate(&block);
        trace!("Executed block {} -> {}", block.id.short(), exec_state_id.short());
        self.add_node(block)
    }

    fn check_insertable(&self, block: &Block) -> Result<Round, String> {
        let parent_round = block.parent_round();
        if block.round <= self.root_round {
            return Err(format!("round {} not above root {}", block.round, self.root_round));
        }
        if let Some(existing) = self.nodes.get(&block.round) {
            return Err(format!(
                "round {} already holds block {}",
                block.round,
                existing.block.id.short()
            ));
        }
        match self.nodes.get(&parent_round) {
            Some(parent) if parent.block.id == block.high_qc.block_id() => Ok(parent_round),
            Some(_) => Err(format!("parent at round {} is a different block", parent_round)),
            None => Err(format!("parent round {} absent", parent_round)),
        }
    }

    fn insert_unchecked(&mut self, block: Block, parent_round: Round) {
        let round = block.round;
        if let Some(parent) = self.nodes.get_mut(&parent_round) {
            parent.children_rounds.insert(round);
        }
        self.rounds_by_id.insert(block.id, round);
        self.nodes.insert(
            round,
            BlockTreeNode {
                block,
                parent_round,
                children_rounds: BTreeSet::new(),
            },
        );
    }

    /// Insert a block under its certified parent.
    ///
    /// Structurally invalid inserts are logged and skipped.
    pub fn add_node(&mut self, block: Block) -> bool {
        match self.check_insertable(&block) {
            Ok(parent_round) => {
                debug!(
                    "Block {} added at round {} under {}",
                    block.id.short(),
                    block.round,
                    parent_round
                );
                self.insert_unchecked(block, parent_round);
                true
            }
            Err(reason) => {
                warn!("Block {} not inserted: {}", block.id.short(), reason);
                false
            }
        }
    }

    /// Whether `block` would be accepted by [`BlockTree::add_node`]
    pub fn can_insert(&self, block: &Block) -> bool {
        self.check_insertable(block).is_ok()
    }

    /// Replace the whole tree with `synced` as its root.
    ///
    /// Used by sync-up once the ledger has caught up past a committed block
    /// whose ancestors this replica never saw.
    pub fn reroot(&mut self, synced: SyncedBlock, mempool: &mut Mempool) {
        let block = synced.block;
        let old_root = self.root_round;
        if let Some(root) = self.nodes.get(&old_root) {
            let children: Vec<Round> = root.children_rounds.iter().copied().collect();
            for child in children {
                self.delete_branch(child, mempool);
            }
        }
        self.nodes.clear();
        self.rounds_by_id.clear();

        if block.high_qc.block_round() > self.high_qc.block_round() {
            self.high_qc = block.high_qc.clone();
        }
        let round = block.round;
        info!("Block tree re-rooted from round {} to {} ({})", old_root, round, block.id.short());
        self.root_round = round;
        self.rounds_by_id.insert(block.id, round);
        self.nodes.insert(
            round,
            BlockTreeNode {
                block,
                parent_round: round,
                children_rounds: BTreeSet::new(),
            },
        );
    }

    /// Insert a block recovered by sync-up and stage its payload.
    pub fn add_missing_block(&mut self, synced: SyncedBlock, mempool: &mut Mempool) -> bool {
        let SyncedBlock {
            block,
            children_rounds,
        } = synced;
        let parent_round = match self.check_insertable(&block) {
            Ok(parent_round) => parent_round,
            Err(reason) => {
                warn!("Synced block {} not inserted: {}", block.id.short(), reason);
                return false;
            }
        };

        mempool.move_to_staging_area(&block.payload);
        let round = block.round;
        let id = block.id;
        self.insert_unchecked(block, parent_round);

        let adopted: Vec<Round> = self
            .nodes
            .iter()
            .filter(|(r, node)| **r != round && node.block.high_qc.block_id() == id)
            .map(|(r, _)| *r)
            .collect();
        for child in adopted.iter().chain(children_rounds.iter()) {
            let is_child = self
                .nodes
                .get(child)
                .is_some_and(|n| n.block.high_qc.block_id() == id);
            if is_child {
                if let Some(node) = self.nodes.get_mut(child) {
                    node.parent_round = round;
                }
                if let Some(node) = self.nodes.get_mut(&round) {
                    node.children_rounds.insert(*child);
                }
            }
        }

        info!("Missing block {} recovered at round {}", id.short(), round);
        true
    }

    /// Blocks strictly above the root up to and including `round`, in round
    /// order. `None` when an ancestor is missing.
    fn chain_from_root(&self, round: Round) -> Option<Vec<Block>> {
        let mut chain = Vec::new();
        let mut r = round;
        while r != self.root_round {
            let node = self.nodes.get(&r)?;
            chain.push(node.block.clone());
            if node.parent_round >= r {
                return None;
            }
            r = node.parent_round;
        }
        chain.reverse();
        Some(chain)
    }

    /// Commit what `qc` certifies as committed, then track it as high QC.
    pub fn process_qc(
        &mut self,
        qc: &QuorumCertificate,
        ctx: &mut CommitContext<'_>,
    ) -> Result<Vec<CommitReceipt>, ConsensusError> {
        let mut receipts = Vec::new();

        if let Some(target) = qc.commit_state_id {
            if let Some(&round) = self.rounds_by_id.get(&target) {
                if round != self.root_round {
                    match self.chain_from_root(round) {
                        Some(chain) => {
                            receipts = ctx.ledger.commit(chain, ctx.hold_back)?;
                            self.prune(&target, ctx.mempool);
                            if qc.block_round() > self.high_commit_qc.block_round() {
                                self.high_commit_qc = qc.clone();
                            }
                        }
                        None => debug!(
                            "Chain to block {} is incomplete, commit deferred to sync-up",
                            target.short()
                        ),
                    }
                }
            }
        }

        if qc.block_round() > self.high_qc.block_round() {
            self.high_qc = qc.clone();
        }
        Ok(receipts)
    }

    /// Aggregate a vote; the `quorum`-th distinct vote yields a QC.
    pub fn process_vote_msg(
        &mut self,
        vote: &VoteMsg,
        former: &KeyPair,
        ctx: &mut CommitContext<'_>,
    ) -> Result<VoteOutcome, ConsensusError> {
        let mut outcome = VoteOutcome::default();
        if let Some(high_commit_qc) = &vote.high_commit_qc {
            outcome.receipts = self.process_qc(high_commit_qc, ctx)?;
        }

        let index = vote.digest()?;
        let aggregator = self
            .pending_votes
            .entry(index)
            .or_insert_with(|| VoteAggregator::new(vote));
        if aggregator.add(vote) && aggregator.len() == self.quorum {
            let qc = aggregator.form(former)?;
            info!("QC formed for block {} (round {})", qc.block_id().short(), qc.block_round());
            outcome.qc = Some(qc);
        }
        Ok(outcome)
    }

    pub fn votes_collected(&self, index: &Hash) -> usize {
        self.pending_votes.get(index).map_or(0, |a| a.len())
    }

    pub fn flush_collected_votes(&mut self) {
        self.pending_votes.clear();
    }

    /// Rounds from `round` down to the root, stopping at a missing ancestor
    pub fn get_branch_rounds(&self, round: Round) -> Vec<Round> {
        let mut branch = vec![round];
        let mut r = round;
        while r > self.root_round {
            let Some(node) = self.nodes.get(&r) else { break };
            if node.parent_round >= r || !self.nodes.contains_key(&node.parent_round) {
                break;
            }
            r = node.parent_round;
            branch.push(r);
        }
        branch
    }

    pub fn sync_metadata(&self, round: Round, log_index: u64) -> SyncMetadata {
        SyncMetadata {
            branch: self.get_branch_rounds(round),
            log_index,
            root_round: self.root_round,
        }
    }

    /// Whether a block above the root still carries requests
    pub fn has_uncommitted_payload(&self) -> bool {
        self.nodes
            .iter()
            .any(|(r, node)| *r != self.root_round && !node.block.payload.is_empty())
    }

    /// Delete the subtree rooted at `round`, returning its requests to pending
    pub fn delete_branch(&mut self, round: Round, mempool: &mut Mempool) {
        if let Some(parent) = self
            .nodes
            .get(&round)
            .map(|n| n.parent_round)
            .filter(|p| *p != round)
        {
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.children_rounds.remove(&round);
            }
        }

        let mut stack = vec![round];
        while let Some(r) = stack.pop() {
            let Some(node) = self.nodes.remove(&r) else { continue };
            self.rounds_by_id.remove(&node.block.id);
            stack.extend(node.children_rounds.iter().copied());
            if !node.block.payload.is_empty() {
                mempool.move_to_pending_queue(node.block.payload);
            }
            debug!("Pruned block at round {}", r);
        }
    }

    /// Make `block_id` the new root: drop branches off the root-to-block
    /// chain, then the chain's ancestors and anything stranded below it.
    pub fn prune(&mut self, block_id: &Hash, mempool: &mut Mempool) {
        let Some(&new_root) = self.rounds_by_id.get(block_id) else {
            return;
        };

        let mut chain = BTreeSet::from([new_root]);
        let mut r = new_root;
        while r != self.root_round {
            match self.nodes.get(&r) {
                Some(node) if node.parent_round < r => {
                    r = node.parent_round;
                    chain.insert(r);
                }
                _ => break,
            }
        }

        for &r in chain.iter().filter(|r| **r != new_root) {
            let off_chain: Vec<Round> = self
                .nodes
                .get(&r)
                .map(|n| n.children_rounds.difference(&chain).copied().collect())
                .unwrap_or_default();
            for child in off_chain {
                self.delete_branch(child, mempool);
            }
        }

        for &r in chain.iter().filter(|r| **r != new_root) {
            if let Some(node) = self.nodes.remove(&r) {
                self.rounds_by_id.remove(&node.block.id);
            }
        }

        let stranded: Vec<Round> = self.nodes.keys().copied().filter(|r| *r < new_root).collect();
        for r in stranded {
            self.delete_branch(r, mempool);
        }

        if let Some(root) = self.nodes.get_mut(&new_root) {
            root.parent_round = new_root;
        }
        self.root_round = new_root;
        debug!("Block tree pruned, root is now round {}\n{}", new_root, self.render());
    }

    /// Human-readable dump of the tree for trace logs
    pub fn render(&self) -> String {
        let mut rounds: Vec<&Round> = self.nodes.keys().collect();
        rounds.sort();
        let mut out = String::new();
        for r in rounds {
            let node = &self.nodes[r];
            let _ = writeln!(
                out,
                "  {}: block={} parent={} children={:?} txs={}",
                r,
                node.block.id.short(),
                node.parent_round,
                node.children_rounds,
                node.block.payload.len()
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::{SyncMetadata, VoteInfo};
    use palisade_ledger::{LedgerConfig, MemoryLog};
    use palisade_mempool::MempoolConfig;

    struct Fixture {
        validators: Vec<KeyPair>,
        tree: BlockTree,
        ledger: Ledger,
        mempool: Mempool,
        client: KeyPair,
    }

    impl Fixture {
        fn new() -> Self {
            let validators: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
            let genesis = Block::genesis(validators[0].public).unwrap();
            let tree = BlockTree::new(genesis, QuorumCertificate::genesis().unwrap(), 3);
            Fixture {
                validators,
                tree,
                ledger: Ledger::new(Box::new(MemoryLog::new()), LedgerConfig::default()).unwrap(),
                mempool: Mempool::new(MempoolConfig::default()).unwrap(),
                client: KeyPair::generate(),
            }
        }

        fn process_qc(&mut self, qc: &QuorumCertificate) -> Vec<CommitReceipt> {
            self.try_process_qc(qc).unwrap()
        }

        fn try_process_qc(&mut self, qc: &QuorumCertificate) -> Result<Vec<CommitReceipt>, ConsensusError> {
            let mut ctx = CommitContext {
                ledger: &mut self.ledger,
                mempool: &mut self.mempool,
                hold_back: false,
            };
            self.tree.process_qc(qc, &mut ctx)
        }

        fn process_vote(&mut self, vote: &VoteMsg, former: &KeyPair) -> VoteOutcome {
            let mut ctx = CommitContext {
                ledger: &mut self.ledger,
                mempool: &mut self.mempool,
                hold_back: false,
            };
            self.tree.process_vote_msg(vote, former, &mut ctx).unwrap()
        }

        fn request(&self, tx: &str) -> ClientRequest {
            ClientRequest::new(&self.client, tx.to_string()).unwrap()
        }

        /// A block at `round` certified-extending `parent`
        fn block(&self, round: Round, parent: &Block, txs: &[&str]) -> Block {
            let payload = txs.iter().map(|tx| self.request(tx)).collect();
            Block::new(self.validators[0].public, round, payload, self.qc_for(parent, None)).unwrap()
        }

        fn vote_info(block: &Block) -> VoteInfo {
            VoteInfo {
                block_id: block.id,
                block_round: block.round,
                parent_block_id: Some(block.high_qc.block_id()),
                parent_block_round: Some(block.high_qc.block_round()),
                exec_state_id: Some(block.id),
            }
        }

        fn vote(&self, voter: &KeyPair, block: &Block, commit: Option<Hash>) -> VoteMsg {
            VoteMsg::new(voter, Self::vote_info(block), commit, None, SyncMetadata::default()).unwrap()
        }

        fn qc_for(&self, block: &Block, commit: Option<Hash>) -> QuorumCertificate {
            self.qc_formed_by(block, commit, 0)
        }

        fn qc_formed_by(&self, block: &Block, commit: Option<Hash>, former: usize) -> QuorumCertificate {
            if block.is_genesis() {
                return QuorumCertificate::genesis().unwrap();
            }
            let votes: Vec<VoteMsg> = self.validators[..3]
                .iter()
                .map(|v| self.vote(v, block, commit))
                .collect();
            let mut aggregator = VoteAggregator::new(&votes[0]);
            for v in &votes {
                aggregator.add(v);
            }
            aggregator.form(&self.validators[former]).unwrap()
        }

        fn genesis(&self) -> Block {
            self.tree.root().unwrap().clone()
        }
    }

    #[test]
    fn test_add_node_links_parent() {
        let mut fx = Fixture::new();
        let b1 = fx.block(1, &fx.genesis(), &[]);
        assert!(fx.tree.add_node(b1.clone()));

        assert_eq!(fx.tree.node(1).unwrap().parent_round, 0);
        assert!(fx.tree.node(0).unwrap().children_rounds.contains(&1));
        assert!(fx.tree.contains_block(&b1.id));
    }

    #[test]
    fn test_add_node_rejects_structural_errors() {
        let mut fx = Fixture::new();
        let genesis = fx.genesis();
        let b1 = fx.block(1, &genesis, &[]);
        fx.tree.add_node(b1.clone());

        // occupied round
        let other = fx.block(1, &genesis, &["x"]);
        assert!(!fx.tree.add_node(other));

        // absent parent
        let b2 = fx.block(2, &b1, &[]);
        let orphan = fx.block(3, &b2, &[]);
        assert!(!fx.tree.add_node(orphan));

        // not above root
        let stale = Block::new(fx.validators[0].public, 0, vec![], QuorumCertificate::genesis().unwrap()).unwrap();
        assert!(!fx.tree.add_node(stale));
        assert_eq!(fx.tree.len(), 2);
    }

    #[test]
    fn test_two_chain_commit_prunes_fork() {
        let mut fx = Fixture::new();
        let genesis = fx.genesis();
        let b1 = fx.block(1, &genesis, &["a"]);
        let fork = fx.block(2, &genesis, &["f"]);
        fx.tree.add_node(b1.clone());
        fx.tree.add_node(fork.clone());
        fx.mempool.move_to_staging_area(&b1.payload);
        fx.mempool.move_to_staging_area(&fork.payload);

        let b3 = fx.block(3, &b1, &[]);
        fx.tree.add_node(b3.clone());

        // QC for b3 with b1 as commit target
        let qc = fx.qc_for(&b3, Some(b1.id));
        let receipts = fx.process_qc(&qc);

        assert_eq!(receipts.len(), 1);
        assert_eq!(fx.tree.root_round(), 1);
        assert!(!fx.tree.contains_block(&fork.id));
        assert!(!fx.tree.contains_round(0));
        assert!(fx.tree.contains_round(3));
        assert_eq!(fx.tree.high_qc().block_round(), 3);
        assert_eq!(fx.tree.high_commit_qc().block_round(), 3);
        // the fork's request is pending again
        assert!(fx.mempool.is_pending(&fork.payload[0].id));
        assert_eq!(fx.ledger.log_index(), 1);
    }

    #[test]
    fn test_commit_deferred_when_chain_broken() {
        let mut fx = Fixture::new();
        let genesis = fx.genesis();
        let b1 = fx.block(1, &genesis, &["a"]);
        let b2 = fx.block(2, &b1, &[]);
        // b1 missing locally
        let qc = fx.qc_for(&b2, Some(b1.id));
        let receipts = fx.process_qc(&qc);

        assert!(receipts.is_empty());
        assert_eq!(fx.tree.root_round(), 0);
        assert_eq!(fx.tree.high_qc().block_round(), 2);
    }

    #[test]
    fn test_failed_commit_keeps_tree_and_can_be_retried() {
        let mut fx = Fixture::new();
        let genesis = fx.genesis();
        let b1 = fx.block(1, &genesis, &["a"]);
        let b2 = fx.block(2, &b1, &["bad\nx"]);
        let b3 = fx.block(3, &b2, &[]);
        for block in [&b1, &b2, &b3] {
            assert!(fx.tree.add_node(block.clone()));
        }

        let qc = fx.qc_for(&b3, Some(b2.id));
        for _ in 0..2 {
            assert!(fx.try_process_qc(&qc).is_err());
            assert_eq!(fx.tree.root_round(), 0);
            assert!(fx.tree.contains_block(&b1.id) && fx.tree.contains_block(&b2.id));
            assert_eq!(fx.ledger.log_index(), 0);
            assert!(fx.ledger.committed_block(&b1.id).is_none());
        }

        // the good prefix still commits
        let qc = fx.qc_for(&b2, Some(b1.id));
        let receipts = fx.process_qc(&qc);
        assert_eq!(receipts.len(), 1);
        assert_eq!(fx.tree.root_round(), 1);
        assert_eq!(fx.ledger.log_index(), 1);
    }

    #[test]
    fn test_high_qc_tie_keeps_existing() {
        let mut fx = Fixture::new();
        let b1 = fx.block(1, &fx.genesis(), &[]);
        fx.tree.add_node(b1.clone());
        let first = fx.qc_formed_by(&b1, None, 0);
        let second = fx.qc_formed_by(&b1, None, 1);
        fx.process_qc(&first);
        fx.process_qc(&second);

        assert_eq!(fx.tree.high_qc().formed_by, Some(fx.validators[0].public));
    }

    #[test]
    fn test_vote_quorum_exactness() {
        let mut fx = Fixture::new();
        let b1 = fx.block(1, &fx.genesis(), &[]);
        let votes: Vec<VoteMsg> = fx.validators.iter().map(|v| fx.vote(v, &b1, None)).collect();
        let leader = fx.validators[1].clone();

        let mut formed = 0;
        for (i, vote) in votes.iter().enumerate() {
            if let Some(qc) = fx.process_vote(vote, &leader).qc {
                assert_eq!(i, 2);
                assert_eq!(qc.signers.len(), 3);
                formed += 1;
            }
            // a repeated vote never counts twice
            assert!(fx.process_vote(vote, &leader).qc.is_none());
        }
        assert_eq!(formed, 1);
        assert_eq!(fx.tree.votes_collected(&votes[0].digest().unwrap()), 4);

        fx.tree.flush_collected_votes();
        assert_eq!(fx.tree.votes_collected(&votes[0].digest().unwrap()), 0);
    }

    #[test]
    fn test_branch_rounds_descend_to_root() {
        let mut fx = Fixture::new();
        let genesis = fx.genesis();
        let b1 = fx.block(1, &genesis, &[]);
        let b3 = fx.block(3, &b1, &[]);
        fx.tree.add_node(b1);
        fx.tree.add_node(b3);

        assert_eq!(fx.tree.get_branch_rounds(3), vec![3, 1, 0]);
        assert_eq!(fx.tree.get_branch_rounds(7), vec![7]);
        let meta = fx.tree.sync_metadata(3, 9);
        assert_eq!(meta.root_round, 0);
        assert_eq!(meta.log_index, 9);
    }

    #[test]
    fn test_delete_branch_returns_all_payloads() {
        let mut fx = Fixture::new();
        let genesis = fx.genesis();
        let b1 = fx.block(1, &genesis, &["a"]);
        let b2 = fx.block(2, &b1, &["b"]);
        let b3 = fx.block(3, &b1, &["c"]);
        for b in [&b1, &b2, &b3] {
            fx.tree.add_node(b.clone());
            fx.mempool.move_to_staging_area(&b.payload);
        }
        assert!(fx.tree.has_uncommitted_payload());

        fx.tree.delete_branch(1, &mut fx.mempool);

        assert_eq!(fx.tree.len(), 1);
        assert_eq!(fx.mempool.num_pending(), 3);
        assert_eq!(fx.mempool.num_staged(), 0);
        assert!(fx.tree.node(0).unwrap().children_rounds.is_empty());
        assert!(!fx.tree.has_uncommitted_payload());
    }

    #[test]
    fn test_reroot_discards_old_tree() {
        let mut fx = Fixture::new();
        let genesis = fx.genesis();
        let b1 = fx.block(1, &genesis, &["a"]);
        fx.tree.add_node(b1.clone());
        fx.mempool.move_to_staging_area(&b1.payload);

        // a committed block far ahead, whose parent this replica never saw
        let b5 = fx.block(5, &fx.block(4, &b1, &[]), &[]);
        fx.tree.reroot(
            SyncedBlock {
                block: b5.clone(),
                children_rounds: vec![],
            },
            &mut fx.mempool,
        );

        assert_eq!(fx.tree.root_round(), 5);
        assert_eq!(fx.tree.len(), 1);
        assert!(fx.mempool.is_pending(&b1.payload[0].id));
        assert_eq!(fx.tree.high_qc().block_round(), 4);

        let b6 = fx.block(6, &b5, &[]);
        assert!(fx.tree.can_insert(&b6));
    }

    #[test]
    fn test_add_missing_block_stages_payload() {
        let mut fx = Fixture::new();
        let b1 = fx.block(1, &fx.genesis(), &["a"]);
        fx.mempool.add_client_request(b1.payload[0].clone());

        let synced = SyncedBlock {
            block: b1.clone(),
            children_rounds: vec![2],
        };
        assert!(fx.tree.add_missing_block(synced, &mut fx.mempool));
        assert!(fx.mempool.is_staged(&b1.payload[0].id));
        assert!(fx.tree.contains_round(1));
    }
}
