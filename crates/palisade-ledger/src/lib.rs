//! Palisade Ledger - Append-only commit log
//!
//! This crate persists committed transactions, tracks the ledger-state hash
//! and keeps a bounded history of committed blocks for leader election.

pub mod error;
pub mod ledger;
pub mod storage;

pub use error::LedgerError;
pub use ledger::{CommitReceipt, Ledger, LedgerConfig};
pub use storage::{FileLog, LogStorage, MemoryLog};
