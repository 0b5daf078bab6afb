use serde::{Deserialize, Serialize};

use crate::crypto::{digest, verify_digest, Hash, KeyPair, PublicKey, Sig};
use crate::error::CoreError;

/// A signed client command. Commands are opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// `hash(sender, transaction)`, stable across retransmissions
    pub id: Hash,
    pub transaction: String,
    pub sender: PublicKey,
    /// Signature over the digest of `transaction`
    pub signature: Sig,
}

impl ClientRequest {
    pub fn new(client: &KeyPair, transaction: String) -> Result<Self, CoreError> {
        let id = digest(&(client.public, &transaction))?;
        let signature = client.sign_digest(&digest(&transaction)?);
        Ok(ClientRequest {
            id,
            transaction,
            sender: client.public,
            signature,
        })
    }

    /// Ledger entries are line-delimited, so a transaction is one line
    pub fn is_single_line(&self) -> bool {
        !self.transaction.contains(|c: char| c == '\n' || c == '\r')
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        if !self.is_single_line() {
            return Err(CoreError::MultilineTransaction);
        }
        if digest(&(self.sender, &self.transaction))? != self.id {
            return Err(CoreError::IdMismatch("client request id"));
        }
        verify_digest(&self.sender, &digest(&self.transaction)?, &self.signature)
    }
}

/// A replica's acknowledgement that a request was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub request_id: Hash,
    /// Ledger-state hash right after the request's block was committed
    pub ledger_state_hash: Hash,
    pub sender: PublicKey,
    pub signature: Sig,
}

impl ClientResponse {
    pub fn new(replica: &KeyPair, request_id: Hash, ledger_state_hash: Hash) -> Self {
        ClientResponse {
            request_id,
            ledger_state_hash,
            sender: replica.public,
            signature: replica.sign_digest(&ledger_state_hash),
        }
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        verify_digest(&self.sender, &self.ledger_state_hash, &self.signature)
    }
}
