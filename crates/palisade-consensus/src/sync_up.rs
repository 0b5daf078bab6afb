//! Block and ledger catch-up for replicas that fell behind.
//!
//! Recovered blocks and log entries are only trusted once `f+1` distinct
//! validators returned the same thing, so at least one honest replica vouches
//! for each of them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use palisade_core::{
    Hash, LogEntry, PublicKey, Round, SyncMetadata, SyncRequestData, SyncResponse, SyncedBlock,
};
use palisade_ledger::Ledger;
use palisade_mempool::Mempool;
use tracing::{debug, info};

use crate::block_tree::BlockTree;
use crate::error::ConsensusError;

/// What processing a sync response changed
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub inserted: Vec<Round>,
    /// Log entries written, each with the ledger-state hash right after it
    pub synced: Vec<(LogEntry, Hash)>,
    pub completed: bool,
}

pub struct SyncUp {
    weak_quorum: usize,
    under_progress: bool,
    requested: BTreeSet<Round>,
    block_responses: HashMap<Hash, (SyncedBlock, HashSet<PublicKey>)>,
    ledger_responses: HashMap<(u64, String), HashSet<PublicKey>>,
    blocks_hbq: BTreeMap<Round, SyncedBlock>,
    ledger_hbq: BTreeMap<u64, String>,
    /// Peer log index the ledger must reach
    log_target: Option<u64>,
    /// Peer root whose committed blocks the ledger is catching up to
    root_target: Option<Round>,
    /// Ask again on the next lagging metadata even if nothing new is missing
    retry: bool,
}

impl SyncUp {
    pub fn new(weak_quorum: usize) -> Self {
        SyncUp {
            weak_quorum,
            under_progress: false,
            requested: BTreeSet::new(),
            block_responses: HashMap::new(),
            ledger_responses: HashMap::new(),
            blocks_hbq: BTreeMap::new(),
            ledger_hbq: BTreeMap::new(),
            log_target: None,
            root_target: None,
            retry: false,
        }
    }

    pub fn under_progress(&self) -> bool {
        self.under_progress
    }

    pub fn is_requested(&self, round: Round) -> bool {
        self.requested.contains(&round)
    }

    pub fn num_held_blocks(&self) -> usize {
        self.blocks_hbq.len()
    }

    pub fn num_held_entries(&self) -> usize {
        self.ledger_hbq.len()
    }

    pub fn log_target(&self) -> Option<u64> {
        self.log_target
    }

    /// Forget which rounds were requested so the next lagging metadata
    /// sends a fresh request. Called on every round advance while syncing.
    pub fn rerequest(&mut self) {
        self.requested.clear();
        self.retry = true;
    }

    /// Compare a peer's chain snapshot with the local one and build a sync
    /// request if blocks or log entries are missing.
    pub fn sync_up_ancestors(
        &mut self,
        meta: &SyncMetadata,
        tree: &BlockTree,
        log_index: u64,
    ) -> Option<SyncRequestData> {
        let root = tree.root_round();
        self.requested.retain(|r| *r > root && !tree.contains_round(*r));
        if root >= meta.root_round {
            return None;
        }

        let missing: Vec<Round> = meta
            .branch
            .iter()
            .copied()
            .filter(|r| *r > root && !tree.contains_round(*r) && !self.requested.contains(r))
            .collect();
        let lagging = meta.root_round - root > 1;
        let new_log_target =
            lagging && (self.retry || self.root_target.map_or(true, |t| meta.root_round > t));
        if missing.is_empty() && !new_log_target {
            return None;
        }

        if new_log_target {
            self.root_target = Some(self.root_target.map_or(meta.root_round, |t| t.max(meta.root_round)));
            self.log_target = Some(self.log_target.map_or(meta.log_index, |t| t.max(meta.log_index)));
        }
        self.requested.extend(missing.iter().copied());
        self.under_progress = true;
        self.retry = false;
        info!(
            "Sync-up needed: missing rounds {:?}, root {} vs peer root {}, log index {} vs {}",
            missing, root, meta.root_round, log_index, meta.log_index
        );

        Some(SyncRequestData {
            missing_rounds: missing,
            log_index,
            root_round: root,
        })
    }

    /// Apply the parts of a response that reached a weak certificate.
    pub fn process_sync_response(
        &mut self,
        response: &SyncResponse,
        tree: &mut BlockTree,
        ledger: &mut Ledger,
        mempool: &mut Mempool,
    ) -> Result<SyncOutcome, ConsensusError> {
        let mut outcome = SyncOutcome::default();
        if !self.under_progress {
            debug!("Sync response from {} while not syncing", response.sender.short());
            return Ok(outcome);
        }

        for synced in &response.data.missing_blocks {
            let id = synced.block.id;
            let (_, senders) = self
                .block_responses
                .entry(id)
                .or_insert_with(|| (synced.clone(), HashSet::new()));
            if !senders.insert(response.sender) || senders.len() != self.weak_quorum {
                continue;
            }

            let round = synced.block.round;
            if round <= tree.root_round() || tree.contains_block(&id) {
                continue;
            }
            if tree.can_insert(&synced.block) {
                if tree.add_missing_block(synced.clone(), mempool) {
                    self.requested.remove(&round);
                    outcome.inserted.push(round);
                }
                self.drain_blocks_hbq(tree, mempool, &mut outcome.inserted);
            } else {
                debug!("Holding synced block at round {} until its parent arrives", round);
                self.blocks_hbq.insert(round, synced.clone());
            }
        }

        for entry in &response.data.log_chunk {
            let senders = self
                .ledger_responses
                .entry((entry.index, entry.command.clone()))
                .or_default();
            if !senders.insert(response.sender) || senders.len() != self.weak_quorum {
                continue;
            }

            let log_index = ledger.log_index();
            if entry.index == log_index {
                let hash = ledger.append_synced(entry)?;
                outcome.synced.push((entry.clone(), hash));
                self.drain_ledger_hbq(ledger, &mut outcome.synced)?;
            } else if entry.index > log_index {
                self.ledger_hbq.insert(entry.index, entry.command.clone());
            }
        }

        outcome.completed = self.check_complete(tree, ledger, mempool, &mut outcome.inserted);
        Ok(outcome)
    }

    fn drain_blocks_hbq(&mut self, tree: &mut BlockTree, mempool: &mut Mempool, inserted: &mut Vec<Round>) {
        loop {
            let ready = self
                .blocks_hbq
                .iter()
                .find(|(_, s)| tree.can_insert(&s.block))
                .map(|(r, _)| *r);
            let Some(round) = ready else { break };
            if let Some(synced) = self.blocks_hbq.remove(&round) {
                if tree.add_missing_block(synced, mempool) {
                    self.requested.remove(&round);
                    inserted.push(round);
                }
            }
        }
        let root = tree.root_round();
        self.blocks_hbq
            .retain(|r, s| *r > root && !tree.contains_block(&s.block.id));
    }

    fn drain_ledger_hbq(
        &mut self,
        ledger: &mut Ledger,
        synced: &mut Vec<(LogEntry, Hash)>,
    ) -> Result<(), ConsensusError> {
        let mut index = ledger.log_index();
        while let Some(command) = self.ledger_hbq.remove(&index) {
            let entry = LogEntry { index, command };
            let hash = ledger.append_synced(&entry)?;
            synced.push((entry, hash));
            index += 1;
        }
        Ok(())
    }

    fn log_caught_up(&self, ledger: &Ledger) -> bool {
        self.log_target.map_or(true, |t| ledger.log_index() >= t)
    }

    /// Re-root on the lowest held block that can never attach to the local
    /// tree, once the ledger holds everything committed before it.
    fn try_reroot(&mut self, tree: &mut BlockTree, mempool: &mut Mempool, inserted: &mut Vec<Round>) {
        let Some(target) = self.root_target else { return };
        let candidate = self
            .blocks_hbq
            .iter()
            .find(|(r, s)| **r <= target && !tree.contains_round(s.block.parent_round()))
            .map(|(r, _)| *r);
        let Some(round) = candidate else { return };
        if let Some(synced) = self.blocks_hbq.remove(&round) {
            tree.reroot(synced, mempool);
            self.requested.remove(&round);
            inserted.push(round);
            self.drain_blocks_hbq(tree, mempool, inserted);
        }
    }

    /// Re-evaluate whether sync-up finished; resets the state when it has.
    pub fn check_complete(
        &mut self,
        tree: &mut BlockTree,
        ledger: &Ledger,
        mempool: &mut Mempool,
        inserted: &mut Vec<Round>,
    ) -> bool {
        if !self.under_progress {
            return false;
        }
        let root = tree.root_round();
        if self.log_target.is_some() && self.root_target.is_some_and(|t| root >= t) {
            // held-back commits up to the peer root cover the log gap
            info!("Root {} reached through local commits, log catch-up dropped", root);
            self.log_target = None;
            self.ledger_responses.clear();
            self.ledger_hbq.clear();
        }
        if self.log_caught_up(ledger) && !self.blocks_hbq.is_empty() {
            self.try_reroot(tree, mempool, inserted);
        }

        let root = tree.root_round();
        self.requested.retain(|r| *r > root && !tree.contains_round(*r));
        self.block_responses
            .retain(|id, (s, _)| s.block.round > root && !tree.contains_block(id));
        let log_index = ledger.log_index();
        self.ledger_responses.retain(|(index, _), _| *index >= log_index);

        let weak = self.weak_quorum;
        let done = self.blocks_hbq.is_empty()
            && self.ledger_hbq.is_empty()
            && self.log_caught_up(ledger)
            && self.block_responses.values().all(|(_, s)| s.len() >= weak)
            && self.ledger_responses.values().all(|s| s.len() >= weak);
        if done {
            info!("Sync-up complete at root {} with log index {}", root, log_index);
            self.reset();
        }
        done
    }

    fn reset(&mut self) {
        self.under_progress = false;
        self.requested.clear();
        self.block_responses.clear();
        self.ledger_responses.clear();
        self.log_target = None;
        self.root_target = None;
        self.retry = false;
    }
}
