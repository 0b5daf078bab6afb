use std::collections::{BTreeMap, HashMap, VecDeque};

use palisade_core::{ClientRequest, Hash};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::MempoolError;

/// Configuration for the mempool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Number of committed results kept for answering retransmissions
    pub cache_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig { cache_size: 1_000 }
    }
}

/// Outcome of admitting a client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New request, queued as pending
    Added,
    /// Already pending or staged
    Duplicate,
    /// Already committed; carries the ledger-state hash to resend
    Cached(Hash),
}

/// The client request pool.
///
/// Owned by a single replica task; a request id lives in at most one of
/// pending, staging and the result cache.
pub struct Mempool {
    config: MempoolConfig,
    /// Pending requests with their insertion sequence number
    pending: HashMap<Hash, (u64, ClientRequest)>,
    /// Insertion order of pending requests
    pending_order: BTreeMap<u64, Hash>,
    next_seq: u64,
    staging: HashMap<Hash, ClientRequest>,
    cached_results: HashMap<Hash, Hash>,
    cache_order: VecDeque<Hash>,
    /// Raw transaction to request id, for pending and staged requests
    by_transaction: HashMap<String, Hash>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Result<Self, MempoolError> {
        if config.cache_size == 0 {
            return Err(MempoolError::InvalidConfig("cache_size must be positive".to_string()));
        }
        Ok(Mempool {
            config,
            pending: HashMap::new(),
            pending_order: BTreeMap::new(),
            next_seq: 0,
            staging: HashMap::new(),
            cached_results: HashMap::new(),
            cache_order: VecDeque::new(),
            by_transaction: HashMap::new(),
        })
    }

    /// Admit a client request unless it is pending, staged or already answered
    pub fn add_client_request(&mut self, request: ClientRequest) -> Admission {
        if let Some(result) = self.cached_results.get(&request.id) {
            debug!("Retransmission of committed request {}", request.id.short());
            return Admission::Cached(*result);
        }
        if self.pending.contains_key(&request.id) || self.staging.contains_key(&request.id) {
            trace!("Duplicate request {}", request.id.short());
            return Admission::Duplicate;
        }

        debug!(
            "Request {} from client {} added to mempool",
            request.id.short(),
            request.sender.short()
        );
        self.push_pending(request);
        Admission::Added
    }

    fn push_pending(&mut self, request: ClientRequest) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_transaction.insert(request.transaction.clone(), request.id);
        self.pending_order.insert(seq, request.id);
        self.pending.insert(request.id, (seq, request));
    }

    fn take_pending(&mut self, id: &Hash) -> Option<ClientRequest> {
        let (seq, request) = self.pending.remove(id)?;
        self.pending_order.remove(&seq);
        Some(request)
    }

    /// Requests placed in a block are being processed. Requests this replica
    /// never received directly are staged as well.
    pub fn move_to_staging_area(&mut self, requests: &[ClientRequest]) -> usize {
        let mut moved = 0;
        for request in requests {
            if self.cached_results.contains_key(&request.id) {
                continue;
            }
            self.take_pending(&request.id);
            if !self.staging.contains_key(&request.id) {
                self.by_transaction.insert(request.transaction.clone(), request.id);
                self.staging.insert(request.id, request.clone());
                moved += 1;
            }
        }
        if moved > 0 {
            debug!("Staged {} requests", moved);
        }
        moved
    }

    /// Return the requests of a pruned block to the pending queue.
    ///
    /// Requests whose result is already cached stay out of the pool.
    pub fn move_to_pending_queue(&mut self, requests: Vec<ClientRequest>) -> usize {
        let mut returned = 0;
        for request in requests {
            self.staging.remove(&request.id);
            if self.cached_results.contains_key(&request.id) || self.pending.contains_key(&request.id) {
                continue;
            }
            self.push_pending(request);
            returned += 1;
        }
        if returned > 0 {
            debug!("Returned {} uncommitted requests to pending", returned);
        }
        returned
    }

    /// Drain every pending request, in arrival order, into staging
    pub fn get_transactions(&mut self) -> Vec<ClientRequest> {
        let ids: Vec<Hash> = self.pending_order.values().copied().collect();
        let requests: Vec<ClientRequest> = ids.iter().filter_map(|id| self.take_pending(id)).collect();
        for request in &requests {
            self.staging.insert(request.id, request.clone());
        }
        requests
    }

    /// Remember the result of a committed request, evicting the oldest entry
    /// once the cache is full.
    pub fn add_to_cache(&mut self, request_id: Hash, result: Hash) {
        if self.cached_results.insert(request_id, result).is_some() {
            return;
        }
        self.cache_order.push_back(request_id);
        while self.cache_order.len() > self.config.cache_size {
            if let Some(oldest) = self.cache_order.pop_front() {
                self.cached_results.remove(&oldest);
            }
        }
    }

    /// Drop a committed request from pending and staging
    pub fn flush_client_request(&mut self, request_id: &Hash) {
        let staged = self.staging.remove(request_id);
        let pending = self.take_pending(request_id);
        if let Some(request) = staged.or(pending) {
            if self.by_transaction.get(&request.transaction) == Some(request_id) {
                self.by_transaction.remove(&request.transaction);
            }
        }
    }

    /// Request id of a pending or staged transaction
    pub fn request_for_transaction(&self, transaction: &str) -> Option<Hash> {
        self.by_transaction.get(transaction).copied()
    }

    /// A pending or staged request by id
    pub fn request(&self, request_id: &Hash) -> Option<&ClientRequest> {
        self.staging
            .get(request_id)
            .or_else(|| self.pending.get(request_id).map(|(_, request)| request))
    }

    pub fn cached_result(&self, request_id: &Hash) -> Option<Hash> {
        self.cached_results.get(request_id).copied()
    }

    pub fn is_pending(&self, request_id: &Hash) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn is_staged(&self, request_id: &Hash) -> bool {
        self.staging.contains_key(request_id)
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn num_staged(&self) -> usize {
        self.staging.len()
    }

    pub fn num_cached(&self) -> usize {
        self.cached_results.len()
    }

    /// Whether there are requests waiting for a block or for commit
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.staging.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::{hash_blake3, KeyPair};

    fn request(client: &KeyPair, tx: &str) -> ClientRequest {
        ClientRequest::new(client, tx.to_string()).unwrap()
    }

    fn mempool(cache_size: usize) -> Mempool {
        Mempool::new(MempoolConfig { cache_size }).unwrap()
    }

    #[test]
    fn test_add_and_duplicate() {
        let mut pool = mempool(10);
        let client = KeyPair::generate();
        let req = request(&client, "a");

        assert_eq!(pool.add_client_request(req.clone()), Admission::Added);
        assert_eq!(pool.add_client_request(req.clone()), Admission::Duplicate);
        assert_eq!(pool.num_pending(), 1);
        assert_eq!(pool.request_for_transaction("a"), Some(req.id));
    }

    #[test]
    fn test_get_transactions_preserves_arrival_order() {
        let mut pool = mempool(10);
        let client = KeyPair::generate();
        for tx in ["c", "a", "b"] {
            pool.add_client_request(request(&client, tx));
        }

        let drained: Vec<String> = pool.get_transactions().into_iter().map(|r| r.transaction).collect();
        assert_eq!(drained, vec!["c", "a", "b"]);
        assert_eq!(pool.num_pending(), 0);
        assert_eq!(pool.num_staged(), 3);
        assert!(pool.has_work());
    }

    #[test]
    fn test_staged_request_is_duplicate() {
        let mut pool = mempool(10);
        let client = KeyPair::generate();
        let req = request(&client, "a");
        pool.move_to_staging_area(std::slice::from_ref(&req));

        assert!(pool.is_staged(&req.id));
        assert_eq!(pool.add_client_request(req), Admission::Duplicate);
    }

    #[test]
    fn test_cached_request_answered_from_cache() {
        let mut pool = mempool(10);
        let client = KeyPair::generate();
        let req = request(&client, "a");
        let result = hash_blake3(b"ledger");

        pool.add_client_request(req.clone());
        pool.get_transactions();
        pool.flush_client_request(&req.id);
        pool.add_to_cache(req.id, result);

        assert!(!pool.has_work());
        assert_eq!(pool.add_client_request(req), Admission::Cached(result));
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut pool = mempool(2);
        let ids: Vec<Hash> = (0..3u8).map(|i| hash_blake3(&[i])).collect();
        for id in &ids {
            pool.add_to_cache(*id, Hash::ZERO);
        }

        assert_eq!(pool.num_cached(), 2);
        assert!(pool.cached_result(&ids[0]).is_none());
        assert!(pool.cached_result(&ids[2]).is_some());
    }

    #[test]
    fn test_pruned_requests_return_to_pending() {
        let mut pool = mempool(10);
        let client = KeyPair::generate();
        pool.add_client_request(request(&client, "a"));
        pool.add_client_request(request(&client, "b"));
        let staged = pool.get_transactions();

        assert_eq!(pool.move_to_pending_queue(staged), 2);
        assert_eq!(pool.num_pending(), 2);
        assert_eq!(pool.num_staged(), 0);
    }

    #[test]
    fn test_cached_requests_not_returned_to_pending() {
        let mut pool = mempool(10);
        let client = KeyPair::generate();
        let req = request(&client, "a");
        pool.add_to_cache(req.id, Hash::ZERO);

        assert_eq!(pool.move_to_pending_queue(vec![req.clone()]), 0);
        assert!(!pool.is_pending(&req.id));
        assert_eq!(pool.move_to_staging_area(&[req]), 0);
    }

    #[test]
    fn test_zero_cache_rejected() {
        assert!(Mempool::new(MempoolConfig { cache_size: 0 }).is_err());
    }
}
