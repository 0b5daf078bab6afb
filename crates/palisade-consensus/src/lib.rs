//! Palisade Consensus - Chained-HotStuff replica logic
//!
//! This crate holds everything a replica needs to agree on a log: the
//! speculative block tree, voting safety rules, the pacemaker, reputation
//! based leader election, sync-up for lagging replicas and the
//! [`ConsensusEngine`] that drives them from inbound messages.

pub mod block_tree;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod leader_election;
pub mod net;
pub mod pacemaker;
pub mod qc;
pub mod safety;
pub mod sync_up;
pub mod timer;

pub use block_tree::{BlockTree, BlockTreeNode, CommitContext, VoteOutcome};
pub use config::ConsensusConfig;
pub use engine::{ConsensusEngine, EngineStatus};
pub use error::ConsensusError;
pub use events::ConsensusEventSink;
pub use interceptor::{MessageInterceptor, NoopInterceptor, ScheduledInterceptor};
pub use leader_election::LeaderElection;
pub use net::Transport;
pub use pacemaker::{Pacemaker, TimeoutProgress};
pub use qc::{verify_qc, verify_tc, TimeoutAggregator, VoteAggregator};
pub use safety::Safety;
pub use sync_up::{SyncOutcome, SyncUp};
pub use timer::{ManualTimer, RoundTimer};
