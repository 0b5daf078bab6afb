pub mod block;
pub mod certificate;
pub mod client;
pub mod message;
pub mod sync;

/// Consensus round number
pub type Round = u64;

pub use block::{genesis_block_id, Block};
pub use certificate::{vote_digest, QuorumCertificate, TimeoutCertificate, VoteInfo};
pub use client::{ClientRequest, ClientResponse};
pub use message::{timeout_digest, Message, MessageKind, ProposalMsg, TimeoutMsg, VoteMsg};
pub use sync::{
    LogEntry, SyncMetadata, SyncRequest, SyncRequestData, SyncResponse, SyncResponseData,
    SyncedBlock,
};
