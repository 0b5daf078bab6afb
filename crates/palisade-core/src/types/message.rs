use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{digest, verify_digest, Hash, KeyPair, PublicKey, Sig};
use crate::error::CoreError;
use crate::types::block::Block;
use crate::types::certificate::{vote_digest, QuorumCertificate, TimeoutCertificate, VoteInfo};
use crate::types::client::{ClientRequest, ClientResponse};
use crate::types::sync::{SyncMetadata, SyncRequest, SyncResponse};
use crate::types::Round;

/// Digest a replica signs when it times out of `round`.
pub fn timeout_digest(round: Round, high_qc_round: Round) -> Result<Hash, CoreError> {
    digest(&(round, high_qc_round))
}

/// A signed vote for a proposed block, sent to the next round's leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMsg {
    pub vote_info: VoteInfo,
    pub vote_info_hash: Hash,
    pub commit_state_id: Option<Hash>,
    pub high_commit_qc: Option<QuorumCertificate>,
    pub meta: SyncMetadata,
    pub sender: PublicKey,
    /// Signature over `hash(commit_state_id, vote_info_hash)`
    pub signature: Sig,
}

impl VoteMsg {
    pub fn new(
        replica: &KeyPair,
        vote_info: VoteInfo,
        commit_state_id: Option<Hash>,
        high_commit_qc: Option<QuorumCertificate>,
        meta: SyncMetadata,
    ) -> Result<Self, CoreError> {
        let vote_info_hash = vote_info.hash()?;
        let signature = replica.sign_digest(&vote_digest(&commit_state_id, &vote_info_hash)?);
        Ok(VoteMsg {
            vote_info,
            vote_info_hash,
            commit_state_id,
            high_commit_qc,
            meta,
            sender: replica.public,
            signature,
        })
    }

    /// Aggregation index; votes agreeing on it certify the same thing
    pub fn digest(&self) -> Result<Hash, CoreError> {
        vote_digest(&self.commit_state_id, &self.vote_info_hash)
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        if self.vote_info.hash()? != self.vote_info_hash {
            return Err(CoreError::IdMismatch("vote_info_hash"));
        }
        verify_digest(&self.sender, &self.digest()?, &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutMsg {
    pub current_round: Round,
    pub high_qc: QuorumCertificate,
    pub last_tc: Option<TimeoutCertificate>,
    pub high_commit_qc: Option<QuorumCertificate>,
    pub meta: SyncMetadata,
    pub sender: PublicKey,
    /// Signature over `hash(current_round, high_qc.block_round)`
    pub signature: Sig,
}

impl TimeoutMsg {
    pub fn new(
        replica: &KeyPair,
        current_round: Round,
        high_qc: QuorumCertificate,
        last_tc: Option<TimeoutCertificate>,
        high_commit_qc: Option<QuorumCertificate>,
        meta: SyncMetadata,
    ) -> Result<Self, CoreError> {
        let signature = replica.sign_digest(&timeout_digest(current_round, high_qc.block_round())?);
        Ok(TimeoutMsg {
            current_round,
            high_qc,
            last_tc,
            high_commit_qc,
            meta,
            sender: replica.public,
            signature,
        })
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        let expected = timeout_digest(self.current_round, self.high_qc.block_round())?;
        verify_digest(&self.sender, &expected, &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalMsg {
    pub block: Block,
    pub last_tc: Option<TimeoutCertificate>,
    pub high_commit_qc: Option<QuorumCertificate>,
    pub meta: SyncMetadata,
    pub sender: PublicKey,
    /// Signature over `block.id`
    pub signature: Sig,
}

impl ProposalMsg {
    pub fn new(
        leader: &KeyPair,
        block: Block,
        last_tc: Option<TimeoutCertificate>,
        high_commit_qc: Option<QuorumCertificate>,
        meta: SyncMetadata,
    ) -> Self {
        let signature = leader.sign_digest(&block.id);
        ProposalMsg {
            block,
            last_tc,
            high_commit_qc,
            meta,
            sender: leader.public,
            signature,
        }
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        self.block.verify_id()?;
        verify_digest(&self.sender, &self.block.id, &self.signature)?;
        for request in &self.block.payload {
            request.verify()?;
        }
        Ok(())
    }
}

/// Discriminant of [`Message`], used by interceptors and in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Vote,
    Timeout,
    Proposal,
    ClientRequest,
    ClientResponse,
    SyncRequest,
    SyncResponse,
}

impl MessageKind {
    /// Kinds only validators may send
    pub fn is_consensus(&self) -> bool {
        !matches!(self, MessageKind::ClientRequest)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Vote => "vote-msg",
            MessageKind::Timeout => "timeout-msg",
            MessageKind::Proposal => "proposal-msg",
            MessageKind::ClientRequest => "client-request",
            MessageKind::ClientResponse => "client-response",
            MessageKind::SyncRequest => "sync-request",
            MessageKind::SyncResponse => "sync-response",
        };
        f.write_str(name)
    }
}

/// Every message exchanged between replicas and clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Message {
    Vote(VoteMsg),
    Timeout(TimeoutMsg),
    Proposal(ProposalMsg),
    ClientRequest(ClientRequest),
    ClientResponse(ClientResponse),
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
}

impl Message {
    /// Claimed sender
    pub fn sender(&self) -> PublicKey {
        match self {
            Message::Vote(m) => m.sender,
            Message::Timeout(m) => m.sender,
            Message::Proposal(m) => m.sender,
            Message::ClientRequest(m) => m.sender,
            Message::ClientResponse(m) => m.sender,
            Message::SyncRequest(m) => m.sender,
            Message::SyncResponse(m) => m.sender,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Vote(_) => MessageKind::Vote,
            Message::Timeout(_) => MessageKind::Timeout,
            Message::Proposal(_) => MessageKind::Proposal,
            Message::ClientRequest(_) => MessageKind::ClientRequest,
            Message::ClientResponse(_) => MessageKind::ClientResponse,
            Message::SyncRequest(_) => MessageKind::SyncRequest,
            Message::SyncResponse(_) => MessageKind::SyncResponse,
        }
    }

    /// Check the sender's signature over the per-kind payload.
    ///
    /// Embedded certificates are verified separately against the validator set.
    pub fn verify(&self) -> Result<(), CoreError> {
        match self {
            Message::Vote(m) => m.verify(),
            Message::Timeout(m) => m.verify(),
            Message::Proposal(m) => m.verify(),
            Message::ClientRequest(m) => m.verify(),
            Message::ClientResponse(m) => m.verify(),
            Message::SyncRequest(m) => m.verify(),
            Message::SyncResponse(m) => m.verify(),
        }
    }

    /// Round the message pertains to, when it has one
    pub fn round(&self) -> Option<Round> {
        match self {
            Message::Vote(m) => Some(m.vote_info.block_round),
            Message::Timeout(m) => Some(m.current_round),
            Message::Proposal(m) => Some(m.block.round),
            _ => None,
        }
    }
}
