use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use palisade_core::{ClientResponse, Hash, PublicKey};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// A result vouched for by `f+1` replicas, so at least one honest one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistentResponse {
    pub request_id: Hash,
    pub ledger_state_hash: Hash,
    pub replicas: Vec<PublicKey>,
}

#[derive(Default)]
struct Collecting {
    /// Latest response per replica
    responses: HashMap<PublicKey, Hash>,
    waiters: Vec<oneshot::Sender<ConsistentResponse>>,
}

/// Gathers replica responses for outstanding client requests.
///
/// A request completes once `weak_quorum` distinct validators report the same
/// ledger-state hash; every waiter registered for it is then notified.
pub struct ResponseCollector {
    validators: HashSet<PublicKey>,
    weak_quorum: usize,
    collecting: Mutex<HashMap<Hash, Collecting>>,
}

impl ResponseCollector {
    pub fn new(validators: impl IntoIterator<Item = PublicKey>, weak_quorum: usize) -> Self {
        ResponseCollector {
            validators: validators.into_iter().collect(),
            weak_quorum,
            collecting: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for the consistent response to `request_id`
    pub fn register(&self, request_id: Hash) -> oneshot::Receiver<ConsistentResponse> {
        let (tx, rx) = oneshot::channel();
        self.lock().entry(request_id).or_default().waiters.push(tx);
        rx
    }

    /// Drop the responses gathered so far, ahead of a retransmission
    pub fn reset(&self, request_id: &Hash) {
        if let Some(collecting) = self.lock().get_mut(request_id) {
            collecting.responses.clear();
        }
    }

    /// Stop waiting for `request_id`
    pub fn forget(&self, request_id: &Hash) {
        self.lock().remove(request_id);
    }

    pub fn num_waiting(&self) -> usize {
        self.lock().len()
    }

    /// Record a replica's response. Returns true if it completed the request.
    pub fn deliver(&self, response: ClientResponse) -> bool {
        if !self.validators.contains(&response.sender) {
            warn!("Dropping response from non-validator {}", response.sender.short());
            return false;
        }
        if let Err(e) = response.verify() {
            warn!("Dropping response from {}: {}", response.sender.short(), e);
            return false;
        }

        let mut collecting = self.lock();
        let Some(entry) = collecting.get_mut(&response.request_id) else {
            debug!("No one waits for request {}", response.request_id.short());
            return false;
        };

        entry
            .responses
            .insert(response.sender, response.ledger_state_hash);
        let mut agreeing: Vec<PublicKey> = entry
            .responses
            .iter()
            .filter(|(_, hash)| **hash == response.ledger_state_hash)
            .map(|(sender, _)| *sender)
            .collect();
        if agreeing.len() < self.weak_quorum {
            return false;
        }

        agreeing.sort();
        let Some(entry) = collecting.remove(&response.request_id) else {
            return false;
        };
        let result = ConsistentResponse {
            request_id: response.request_id,
            ledger_state_hash: response.ledger_state_hash,
            replicas: agreeing,
        };
        info!(
            "Request {} settled at ledger hash {}",
            result.request_id.short(),
            result.ledger_state_hash.short()
        );
        for waiter in entry.waiters {
            let _ = waiter.send(result.clone());
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Hash, Collecting>> {
        self.collecting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
