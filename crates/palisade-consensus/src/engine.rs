//! The replica state machine.
//!
//! [`ConsensusEngine`] owns every piece of consensus state for one replica
//! and is driven by two inputs: inbound messages and round-timer expiry.
//! All outbound traffic goes through the [`Transport`].

use std::collections::HashSet;
use std::sync::Arc;

use palisade_core::{
    ClientRequest, ClientResponse, KeyPair, Message, ProposalMsg, PublicKey,
    QuorumCertificate, Round, SyncMetadata, SyncRequest, SyncResponse, SyncResponseData,
    SyncedBlock, TimeoutCertificate, TimeoutMsg, VoteMsg,
};
use palisade_ledger::{CommitReceipt, Ledger, LedgerConfig, LogStorage};
use palisade_mempool::{Admission, Mempool, MempoolConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::block_tree::{BlockTree, CommitContext};
use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::events::ConsensusEventSink;
use crate::interceptor::{MessageInterceptor, NoopInterceptor};
use crate::leader_election::LeaderElection;
use crate::net::Transport;
use crate::pacemaker::Pacemaker;
use crate::qc::{verify_qc, verify_tc};
use crate::safety::Safety;
use crate::sync_up::{SyncOutcome, SyncUp};
use crate::timer::RoundTimer;

/// Snapshot of a replica's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub id: String,
    pub current_round: Round,
    pub root_round: Round,
    pub high_qc_round: Round,
    pub log_index: u64,
    pub ledger_state_hash: String,
    pub pending: usize,
    pub staged: usize,
    pub syncing: bool,
}

pub struct ConsensusEngine {
    config: ConsensusConfig,
    keypair: KeyPair,
    validators: Vec<PublicKey>,
    validator_set: HashSet<PublicKey>,
    block_tree: BlockTree,
    safety: Safety,
    pacemaker: Pacemaker,
    election: LeaderElection,
    ledger: Ledger,
    mempool: Mempool,
    sync_up: SyncUp,
    transport: Arc<dyn Transport>,
    interceptor: Box<dyn MessageInterceptor>,
    events: Option<Arc<dyn ConsensusEventSink>>,
    proposed_round: Option<Round>,
    /// A QC formed here committed client requests peers have not seen yet
    announce_commit: bool,
}

impl ConsensusEngine {
    pub fn new(
        config: ConsensusConfig,
        keypair: KeyPair,
        validators: Vec<PublicKey>,
        storage: Box<dyn LogStorage>,
        transport: Arc<dyn Transport>,
        timer: Box<dyn RoundTimer>,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        let validator_set: HashSet<PublicKey> = validators.iter().copied().collect();
        if validator_set.len() != config.num_validators {
            return Err(ConsensusError::InvalidConfig(format!(
                "expected {} distinct validators, got {}",
                config.num_validators,
                validator_set.len()
            )));
        }
        if !validator_set.contains(&keypair.public) {
            return Err(ConsensusError::InvalidConfig(format!(
                "replica {} is not a validator",
                keypair.public.short()
            )));
        }

        let election = LeaderElection::new(
            validators,
            config.window_size,
            config.exclude_size,
            config.leader_history,
        );
        let genesis = palisade_core::Block::genesis(election.get_leader(0))
            .map_err(|e| ConsensusError::Genesis(e.to_string()))?;
        let genesis_qc = QuorumCertificate::genesis().map_err(|e| ConsensusError::Genesis(e.to_string()))?;

        let ledger = Ledger::new(
            storage,
            LedgerConfig {
                commit_history: config.commit_history,
            },
        )?;
        let mempool = Mempool::new(MempoolConfig {
            cache_size: config.mempool_cache_size,
        })?;

        Ok(ConsensusEngine {
            validators: election.validators().to_vec(),
            validator_set,
            block_tree: BlockTree::new(genesis, genesis_qc, config.quorum()),
            safety: Safety::new(keypair.clone()),
            pacemaker: Pacemaker::new(
                keypair.clone(),
                timer,
                config.round_timeout(),
                config.quorum(),
                config.weak_quorum(),
            ),
            sync_up: SyncUp::new(config.weak_quorum()),
            election,
            ledger,
            mempool,
            transport,
            interceptor: Box::new(NoopInterceptor),
            events: None,
            proposed_round: None,
            announce_commit: false,
            config,
            keypair,
        })
    }

    pub fn with_interceptor(mut self, interceptor: Box<dyn MessageInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn ConsensusEventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Process the genesis QC and enter round 1
    pub fn start(&mut self) -> Result<(), ConsensusError> {
        let genesis_qc =
            QuorumCertificate::genesis().map_err(|e| ConsensusError::Genesis(e.to_string()))?;
        self.process_quorum_certificate(&genesis_qc)
            .map_err(|e| ConsensusError::Genesis(e.to_string()))?;
        info!(
            "Replica {} started in round {} ({} validators, f = {})",
            self.id().short(),
            self.pacemaker.current_round(),
            self.config.num_validators,
            self.config.f
        );
        Ok(())
    }

    pub fn id(&self) -> PublicKey {
        self.keypair.public
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn validators(&self) -> &[PublicKey] {
        &self.validators
    }

    pub fn current_round(&self) -> Round {
        self.pacemaker.current_round()
    }

    pub fn leader(&self, round: Round) -> PublicKey {
        self.election.get_leader(round)
    }

    pub fn block_tree(&self) -> &BlockTree {
        &self.block_tree
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn highest_vote_round(&self) -> Round {
        self.safety.highest_vote_round()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_up.under_progress()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            id: self.id().to_hex(),
            current_round: self.pacemaker.current_round(),
            root_round: self.block_tree.root_round(),
            high_qc_round: self.block_tree.high_qc().block_round(),
            log_index: self.ledger.log_index(),
            ledger_state_hash: self.ledger.ledger_state_hash().to_hex(),
            pending: self.mempool.num_pending(),
            staged: self.mempool.num_staged(),
            syncing: self.sync_up.under_progress(),
        }
    }

    /// Entry point for every inbound message.
    ///
    /// Invalid messages are dropped and failures are logged; nothing here is
    /// fatal to the replica.
    pub fn handle_message(&mut self, from: &PublicKey, msg: Message) {
        let Some(msg) = self.interceptor.intercept_incoming(from, msg) else {
            trace!("Incoming message from {} dropped by interceptor", from.short());
            return;
        };
        let kind = msg.kind();
        if let Err(e) = self.authenticate(from, &msg) {
            warn!("Rejected {} from {}: {}", kind, from.short(), e);
            return;
        }

        let result = match msg {
            Message::Proposal(m) => self.process_proposal_msg(m),
            Message::Vote(m) => self.process_vote_msg(m),
            Message::Timeout(m) => self.process_timeout_msg(m),
            Message::ClientRequest(m) => self.process_client_request(m),
            Message::SyncRequest(m) => self.process_sync_request(m),
            Message::SyncResponse(m) => self.process_sync_response(m),
            Message::ClientResponse(m) => {
                debug!("Ignoring client response for {}", m.request_id.short());
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(e @ ConsensusError::Ledger(_)) => error!("Failed to process {}: {}", kind, e),
            Err(e) => warn!("Failed to process {}: {}", kind, e),
        }
    }

    /// Round timer expiry for `round`
    pub fn on_local_timeout(&mut self, round: Round) {
        if round != self.pacemaker.current_round() {
            debug!("Stale timer for round {} (current {})", round, self.pacemaker.current_round());
            return;
        }
        if let Err(e) = self.timeout_local_round(true) {
            error!("Failed to time out round {}: {}", round, e);
        }
    }

    fn authenticate(&self, from: &PublicKey, msg: &Message) -> Result<(), ConsensusError> {
        let claimed = msg.sender();
        if claimed != *from {
            return Err(ConsensusError::SenderMismatch {
                delivered: from.short(),
                claimed: claimed.short(),
            });
        }
        if msg.kind().is_consensus() && !self.validator_set.contains(from) {
            return Err(ConsensusError::ValidatorNotFound(from.to_hex()));
        }
        msg.verify()?;

        let quorum = self.config.quorum();
        let check_qc = |qc: &QuorumCertificate| verify_qc(qc, &self.validator_set, quorum);
        let check_tc = |tc: &TimeoutCertificate| verify_tc(tc, &self.validator_set, quorum);
        match msg {
            Message::Proposal(m) => {
                check_qc(&m.block.high_qc)?;
                m.high_commit_qc.as_ref().map_or(Ok(()), check_qc)?;
                m.last_tc.as_ref().map_or(Ok(()), check_tc)?;
            }
            Message::Vote(m) => {
                m.high_commit_qc.as_ref().map_or(Ok(()), check_qc)?;
            }
            Message::Timeout(m) => {
                check_qc(&m.high_qc)?;
                m.high_commit_qc.as_ref().map_or(Ok(()), check_qc)?;
                m.last_tc.as_ref().map_or(Ok(()), check_tc)?;
            }
            Message::SyncResponse(m) => {
                for synced in &m.data.missing_blocks {
                    synced.block.verify_id()?;
                    check_qc(&synced.block.high_qc)?;
                    for request in &synced.block.payload {
                        request.verify()?;
                    }
                }
            }
            Message::ClientRequest(_) | Message::ClientResponse(_) | Message::SyncRequest(_) => {}
        }
        Ok(())
    }

    fn send(&mut self, to: &PublicKey, msg: Message) {
        let kind = msg.kind();
        match self.interceptor.intercept_outgoing(to, msg) {
            Some(msg) => self.transport.send(to, msg),
            None => trace!("Outgoing {} to {} dropped by interceptor", kind, to.short()),
        }
    }

    /// Send to every validator, this replica included
    fn broadcast(&mut self, msg: Message) {
        let validators = self.validators.clone();
        for peer in &validators {
            self.send(peer, msg.clone());
        }
    }

    fn has_work(&self) -> bool {
        self.mempool.has_work()
    }

    fn commit_context(&mut self) -> (&mut BlockTree, CommitContext<'_>) {
        let hold_back = self.sync_up.under_progress();
        (
            &mut self.block_tree,
            CommitContext {
                ledger: &mut self.ledger,
                mempool: &mut self.mempool,
                hold_back,
            },
        )
    }

    fn on_round_advanced(&mut self, from: Round) {
        let to = self.pacemaker.current_round();
        self.block_tree.flush_collected_votes();
        self.announce_commit = false;
        if self.sync_up.under_progress() {
            self.sync_up.rerequest();
        }
        self.interceptor.on_round_advanced(from, to);
        if let Some(events) = &self.events {
            events.on_round_advanced(&self.keypair.public, to);
        }
    }

    fn advance_round_on_tc(&mut self, tc: Option<&TimeoutCertificate>) {
        let from = self.pacemaker.current_round();
        if self.pacemaker.advance_round_on_tc(tc, self.has_work()) {
            self.on_round_advanced(from);
        }
    }

    /// Answer committed requests and record their results
    fn deliver_receipts(&mut self, receipts: Vec<CommitReceipt>) {
        if receipts.is_empty() {
            return;
        }
        for receipt in receipts {
            if self.mempool.cached_result(&receipt.request_id).is_some() {
                continue;
            }
            self.mempool.add_to_cache(receipt.request_id, receipt.ledger_state_hash);
            self.mempool.flush_client_request(&receipt.request_id);
            let response = ClientResponse::new(&self.keypair, receipt.request_id, receipt.ledger_state_hash);
            self.send(&receipt.client, Message::ClientResponse(response));
            if let Some(events) = &self.events {
                events.on_request_committed(&self.keypair.public, &receipt);
            }
        }
        if !self.has_work() {
            self.pacemaker.stop_timer();
        }
    }

    /// Commit what `qc` certifies, elect the next leader and advance the
    /// round. Returns whether client requests were committed.
    fn process_quorum_certificate(&mut self, qc: &QuorumCertificate) -> Result<bool, ConsensusError> {
        let receipts = {
            let (tree, mut ctx) = self.commit_context();
            tree.process_qc(qc, &mut ctx)?
        };
        let committed = !receipts.is_empty();
        self.deliver_receipts(receipts);

        let current = self.pacemaker.current_round();
        self.election.update_leaders(qc, current, &self.ledger);
        if let Some(leader) = self.interceptor.scheduled_leader(current + 1) {
            self.election.set_leader(current + 1, leader);
        }

        if self.pacemaker.advance_round_on_qc(qc, self.has_work()) {
            self.on_round_advanced(current);
        }
        Ok(committed)
    }

    /// Request missing ancestors if `meta` shows this replica lagging, or
    /// finish a running sync-up
    fn sync_check(&mut self, meta: &SyncMetadata) -> Result<(), ConsensusError> {
        let log_index = self.ledger.log_index();
        if let Some(data) = self.sync_up.sync_up_ancestors(meta, &self.block_tree, log_index) {
            let request = SyncRequest::new(&self.keypair, data)?;
            let me = self.keypair.public;
            let peers: Vec<PublicKey> = self.validators.iter().copied().filter(|v| *v != me).collect();
            for peer in &peers {
                self.send(peer, Message::SyncRequest(request.clone()));
            }
        } else if self.sync_up.under_progress() {
            let mut inserted = Vec::new();
            let completed = self.sync_up.check_complete(
                &mut self.block_tree,
                &self.ledger,
                &mut self.mempool,
                &mut inserted,
            );
            if completed {
                self.finish_sync()?;
            }
        }
        Ok(())
    }

    fn finish_sync(&mut self) -> Result<(), ConsensusError> {
        let receipts = self.ledger.flush_held_back()?;
        self.deliver_receipts(receipts);
        Ok(())
    }

    fn process_client_request(&mut self, request: ClientRequest) -> Result<(), ConsensusError> {
        let (client, request_id) = (request.sender, request.id);
        match self.mempool.add_client_request(request) {
            Admission::Added => {
                self.pacemaker.ensure_timer(true);
                let current = self.pacemaker.current_round();
                if self.proposed_round != Some(current) {
                    let last_tc = self.pacemaker.last_tc().cloned();
                    self.process_new_round(last_tc)?;
                }
            }
            Admission::Duplicate => trace!("Request {} already known", request_id.short()),
            Admission::Cached(result) => {
                let response = ClientResponse::new(&self.keypair, request_id, result);
                self.send(&client, Message::ClientResponse(response));
            }
        }
        Ok(())
    }

    /// Attached certificates are processed before the sync-up check and
    /// before the payload is staged, since a commit they trigger may prune a
    /// branch holding the same requests.
    fn process_proposal_msg(&mut self, proposal: ProposalMsg) -> Result<(), ConsensusError> {
        let ProposalMsg {
            block,
            last_tc,
            high_commit_qc,
            meta,
            sender,
            ..
        } = proposal;
        self.process_quorum_certificate(&block.high_qc)?;
        if let Some(qc) = &high_commit_qc {
            self.process_quorum_certificate(qc)?;
        }
        self.advance_round_on_tc(last_tc.as_ref());
        self.sync_check(&meta)?;
        self.mempool.move_to_staging_area(&block.payload);

        let round = self.pacemaker.current_round();
        let leader = self.election.get_leader(round);
        if block.round != round || sender != leader || block.author != leader {
            debug!(
                "Ignoring proposal {} for round {} from {} (current round {}, leader {})",
                block.id.short(),
                block.round,
                sender.short(),
                round,
                leader.short()
            );
            if !self.block_tree.contains_block(&block.id) {
                self.mempool.move_to_pending_queue(block.payload);
            }
            return Ok(());
        }

        info!(
            "Received proposal {} for round {} with {} requests",
            block.id.short(),
            block.round,
            block.payload.len()
        );
        let exec_state_id = self.ledger.speculate(&block);
        let inserted = self.block_tree.execute_and_insert(block.clone(), &self.ledger);
        if !inserted && self.block_tree.node(block.round).is_some_and(|n| n.block.id != block.id) {
            warn!(
                "Leader {} proposed a second block for round {}",
                sender.short(),
                block.round
            );
            self.mempool.move_to_pending_queue(block.payload);
            return Ok(());
        }
        self.pacemaker.ensure_timer(self.has_work());

        let meta = self
            .block_tree
            .sync_metadata(block.high_qc.block_round(), self.ledger.log_index());
        let vote = self.safety.make_vote(
            &block,
            last_tc.as_ref(),
            exec_state_id,
            self.block_tree.high_commit_qc(),
            meta,
        )?;
        if let Some(vote) = vote {
            let next_leader = self.election.get_leader(round + 1);
            debug!("Voting for block {}, vote sent to {}", block.id.short(), next_leader.short());
            self.send(&next_leader, Message::Vote(vote));
        }
        Ok(())
    }

    fn process_vote_msg(&mut self, vote: VoteMsg) -> Result<(), ConsensusError> {
        let outcome = {
            let keypair = self.keypair.clone();
            let (tree, mut ctx) = self.commit_context();
            tree.process_vote_msg(&vote, &keypair, &mut ctx)?
        };
        self.deliver_receipts(outcome.receipts);
        self.sync_check(&vote.meta)?;

        match outcome.qc {
            Some(qc) => {
                let committed = self.process_quorum_certificate(&qc)?;
                if committed {
                    self.announce_commit = true;
                }
                self.process_new_round(None)
            }
            None => {
                debug!(
                    "Vote for block {} from {} ({} collected)",
                    vote.vote_info.block_id.short(),
                    vote.sender.short(),
                    self.block_tree.votes_collected(&vote.digest()?)
                );
                Ok(())
            }
        }
    }

    fn process_timeout_msg(&mut self, timeout: TimeoutMsg) -> Result<(), ConsensusError> {
        self.process_quorum_certificate(&timeout.high_qc)?;
        if let Some(qc) = &timeout.high_commit_qc {
            self.process_quorum_certificate(qc)?;
        }
        self.advance_round_on_tc(timeout.last_tc.as_ref());
        self.sync_check(&timeout.meta)?;

        let progress = self.pacemaker.process_remote_timeout(&timeout)?;
        if progress.local_timeout {
            info!(
                "Timing out round {} after {} remote timeouts for round {}",
                self.pacemaker.current_round(),
                self.config.weak_quorum(),
                timeout.current_round
            );
            self.timeout_local_round(false)?;
        }
        if let Some(tc) = progress.tc {
            self.advance_round_on_tc(Some(&tc));
            self.process_new_round(Some(tc))?;
        }
        Ok(())
    }

    /// Broadcast a timeout for the current round. A timer expiry may resend
    /// it; a forced timeout happens at most once per round.
    fn timeout_local_round(&mut self, retransmit: bool) -> Result<(), ConsensusError> {
        let round = self.pacemaker.current_round();
        if !self.pacemaker.mark_local_timeout(round) && !retransmit {
            return Ok(());
        }
        self.pacemaker.stop_timer();

        let meta = self
            .block_tree
            .sync_metadata(self.block_tree.high_qc().block_round(), self.ledger.log_index());
        let msg = self.safety.make_timeout(
            round,
            self.block_tree.high_qc(),
            self.pacemaker.last_tc(),
            self.block_tree.high_commit_qc(),
            meta,
        )?;
        match msg {
            Some(msg) => {
                info!("Round {} timed out, broadcasting timeout", round);
                self.broadcast(Message::Timeout(msg));
            }
            None => debug!("Round {} timer expired but timing out is not safe", round),
        }
        self.pacemaker.restart_timer(self.has_work());
        Ok(())
    }

    /// Propose a block if this replica leads the current round
    fn process_new_round(&mut self, last_tc: Option<TimeoutCertificate>) -> Result<(), ConsensusError> {
        let round = self.pacemaker.current_round();
        if self.election.get_leader(round) != self.keypair.public
            || self.sync_up.under_progress()
            || self.proposed_round == Some(round)
        {
            return Ok(());
        }
        if !(self.mempool.has_work() || self.block_tree.has_uncommitted_payload() || self.announce_commit) {
            debug!("Leader of round {} with nothing to propose", round);
            return Ok(());
        }
        self.announce_commit = false;

        let payload = self.mempool.get_transactions();
        let block = self.block_tree.generate_block(self.keypair.public, round, payload)?;
        let meta = self
            .block_tree
            .sync_metadata(block.high_qc.block_round(), self.ledger.log_index());
        info!(
            "Proposing block {} for round {} with {} requests",
            block.id.short(),
            round,
            block.payload.len()
        );
        let proposal = ProposalMsg::new(
            &self.keypair,
            block,
            last_tc,
            Some(self.block_tree.high_commit_qc().clone()),
            meta,
        );
        self.proposed_round = Some(round);
        self.broadcast(Message::Proposal(proposal));
        Ok(())
    }

    fn process_sync_request(&mut self, request: SyncRequest) -> Result<(), ConsensusError> {
        let mut data = SyncResponseData::default();
        if self.block_tree.root_round().saturating_sub(request.data.root_round) > 1 {
            data.log_chunk = self.ledger.get_log_chunk(request.data.log_index)?;
        }
        for round in &request.data.missing_rounds {
            if let Some(node) = self.block_tree.node(*round) {
                data.missing_blocks.push(SyncedBlock {
                    block: node.block.clone(),
                    children_rounds: node.children_rounds.iter().copied().collect(),
                });
            }
        }
        if data.is_empty() {
            trace!("Nothing to return for sync request from {}", request.sender.short());
            return Ok(());
        }

        debug!(
            "Answering sync request from {}: {} blocks, {} log entries",
            request.sender.short(),
            data.missing_blocks.len(),
            data.log_chunk.len()
        );
        let response = SyncResponse::new(&self.keypair, request.id, data)?;
        self.send(&request.sender, Message::SyncResponse(response));
        Ok(())
    }

    fn process_sync_response(&mut self, response: SyncResponse) -> Result<(), ConsensusError> {
        let outcome = self.sync_up.process_sync_response(
            &response,
            &mut self.block_tree,
            &mut self.ledger,
            &mut self.mempool,
        )?;
        self.apply_sync_outcome(outcome)
    }

    fn apply_sync_outcome(&mut self, outcome: SyncOutcome) -> Result<(), ConsensusError> {
        for (entry, hash) in outcome.synced {
            let Some(request_id) = self.mempool.request_for_transaction(&entry.command) else {
                continue;
            };
            let client = self.mempool.request(&request_id).map(|r| r.sender);
            self.mempool.add_to_cache(request_id, hash);
            self.mempool.flush_client_request(&request_id);
            if let Some(client) = client {
                let response = ClientResponse::new(&self.keypair, request_id, hash);
                self.send(&client, Message::ClientResponse(response));
            }
        }
        if outcome.completed {
            self.finish_sync()?;
        }
        Ok(())
    }
}
