use std::collections::{HashMap, VecDeque};

use palisade_core::{Block, Hash, LogEntry, PublicKey, Round};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::storage::{check_entry, LogStorage};

/// Everything one commit writes, computed up front
struct Batch {
    entries: Vec<String>,
    receipts: Vec<CommitReceipt>,
    hasher: blake3::Hasher,
    sync_credits: HashMap<String, usize>,
}

fn check_block(block: &Block) -> Result<(), LedgerError> {
    block.transactions().try_for_each(check_entry)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Number of committed blocks remembered for leader election
    pub commit_history: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig { commit_history: 32 }
    }
}

/// Result of committing one client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub block_id: Hash,
    pub round: Round,
    pub request_id: Hash,
    pub client: PublicKey,
    /// Ledger-state hash right after the request's block was written
    pub ledger_state_hash: Hash,
}

/// The replica's committed log.
///
/// The ledger-state hash is the blake3 hash of the whole log as stored on
/// disk, maintained incrementally as entries are appended.
pub struct Ledger {
    config: LedgerConfig,
    storage: Box<dyn LogStorage>,
    hasher: blake3::Hasher,
    /// Blocks whose commit waits for sync-up to finish
    held_back: VecDeque<Block>,
    history: VecDeque<Hash>,
    committed: HashMap<Hash, Block>,
    /// Transactions written by sync-up that a local commit must not write again
    sync_credits: HashMap<String, usize>,
}

impl Ledger {
    pub fn new(storage: Box<dyn LogStorage>, config: LedgerConfig) -> Result<Self, LedgerError> {
        if config.commit_history == 0 {
            return Err(LedgerError::InvalidConfig(
                "commit_history must be positive".to_string(),
            ));
        }

        let mut hasher = blake3::Hasher::new();
        for entry in storage.read_from(0)? {
            hasher.update(entry.as_bytes());
            hasher.update(b"\n");
        }
        if !storage.is_empty() {
            info!("Reopened ledger with {} entries", storage.len());
        }

        Ok(Ledger {
            config,
            storage,
            hasher,
            held_back: VecDeque::new(),
            history: VecDeque::new(),
            committed: HashMap::new(),
            sync_credits: HashMap::new(),
        })
    }

    /// Execution state of a block. Commands are opaque, so it is the block id.
    pub fn speculate(&self, block: &Block) -> Hash {
        block.id
    }

    /// Commit a chain of blocks in round order.
    ///
    /// With `hold_back` set the blocks are queued until [`Ledger::flush_held_back`];
    /// otherwise the queue is written first. Blocks enter the committed history
    /// immediately either way. A commit is all or nothing: on error neither the
    /// log nor its hash changed.
    pub fn commit(&mut self, chain: Vec<Block>, hold_back: bool) -> Result<Vec<CommitReceipt>, LedgerError> {
        if hold_back {
            for block in &chain {
                check_block(block)?;
            }
            for block in chain {
                debug!("Holding back commit of block {} (round {})", block.id.short(), block.round);
                self.record_committed(&block);
                self.held_back.push_back(block);
            }
            return Ok(Vec::new());
        }

        let batch = self.prepare(self.held_back.iter().chain(chain.iter()))?;
        let flushed = self.held_back.len();
        let receipts = self.apply(batch)?;
        self.held_back.clear();
        for block in &chain {
            self.record_committed(block);
        }

        if let Some(last) = chain.last() {
            info!(
                "Committed {} block(s) up to {} (round {}), log index {}",
                chain.len() + flushed,
                last.id.short(),
                last.round,
                self.log_index()
            );
        }
        Ok(receipts)
    }

    /// Commit every held-back block in order
    pub fn flush_held_back(&mut self) -> Result<Vec<CommitReceipt>, LedgerError> {
        if self.held_back.is_empty() {
            return Ok(Vec::new());
        }
        let batch = self.prepare(self.held_back.iter())?;
        let receipts = self.apply(batch)?;
        info!(
            "Flushed {} held-back block(s), log index {}",
            self.held_back.len(),
            self.log_index()
        );
        self.held_back.clear();
        Ok(receipts)
    }

    pub fn num_held_back(&self) -> usize {
        self.held_back.len()
    }

    /// Work out what committing `blocks` writes without touching the log
    fn prepare<'a>(&self, blocks: impl Iterator<Item = &'a Block>) -> Result<Batch, LedgerError> {
        let mut batch = Batch {
            entries: Vec::new(),
            receipts: Vec::new(),
            hasher: self.hasher.clone(),
            sync_credits: self.sync_credits.clone(),
        };

        for block in blocks {
            check_block(block)?;
            for tx in block.transactions() {
                match batch.sync_credits.get_mut(tx) {
                    Some(credit) if *credit > 0 => {
                        *credit -= 1;
                        if *credit == 0 {
                            batch.sync_credits.remove(tx);
                        }
                    }
                    _ => {
                        batch.hasher.update(tx.as_bytes());
                        batch.hasher.update(b"\n");
                        batch.entries.push(tx.to_string());
                    }
                }
            }

            let ledger_state_hash = Hash::new(*batch.hasher.finalize().as_bytes());
            batch.receipts.extend(block.payload.iter().map(|req| CommitReceipt {
                block_id: block.id,
                round: block.round,
                request_id: req.id,
                client: req.sender,
                ledger_state_hash,
            }));
        }
        Ok(batch)
    }

    fn apply(&mut self, batch: Batch) -> Result<Vec<CommitReceipt>, LedgerError> {
        if !batch.entries.is_empty() {
            self.storage.append(&batch.entries)?;
        }
        self.hasher = batch.hasher;
        self.sync_credits = batch.sync_credits;
        Ok(batch.receipts)
    }

    fn record_committed(&mut self, block: &Block) {
        if self.committed.insert(block.id, block.clone()).is_some() {
            return;
        }
        self.history.push_back(block.id);
        while self.history.len() > self.config.commit_history {
            if let Some(oldest) = self.history.pop_front() {
                self.committed.remove(&oldest);
            }
        }
    }

    /// Write a log entry received through sync-up at the end of the log.
    ///
    /// Returns the ledger-state hash after the write.
    pub fn append_synced(&mut self, entry: &LogEntry) -> Result<Hash, LedgerError> {
        let expected = self.log_index();
        if entry.index != expected {
            return Err(LedgerError::OutOfOrder {
                expected,
                got: entry.index,
            });
        }
        self.storage.append(std::slice::from_ref(&entry.command))?;
        self.hasher.update(entry.command.as_bytes());
        self.hasher.update(b"\n");
        *self.sync_credits.entry(entry.command.clone()).or_insert(0) += 1;
        debug!("Synced log entry {}: {}", entry.index, entry.command);
        Ok(self.ledger_state_hash())
    }

    /// Entries from `from` to the end of the log
    pub fn get_log_chunk(&self, from: u64) -> Result<Vec<LogEntry>, LedgerError> {
        if from >= self.log_index() {
            return Ok(Vec::new());
        }
        Ok(self
            .storage
            .read_from(from)?
            .into_iter()
            .zip(from..)
            .map(|(command, index)| LogEntry { index, command })
            .collect())
    }

    /// A recently committed block, if still in the history
    pub fn committed_block(&self, id: &Hash) -> Option<&Block> {
        self.committed.get(id)
    }

    /// Number of entries in the log
    pub fn log_index(&self) -> u64 {
        self.storage.len()
    }

    pub fn ledger_state_hash(&self) -> Hash {
        Hash::new(*self.hasher.finalize().as_bytes())
    }
}
