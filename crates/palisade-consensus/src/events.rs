use palisade_core::{PublicKey, Round};
use palisade_ledger::CommitReceipt;

/// Observer of a replica's progress, e.g. for client-facing event streams
pub trait ConsensusEventSink: Send + Sync {
    fn on_request_committed(&self, replica: &PublicKey, receipt: &CommitReceipt);

    fn on_round_advanced(&self, _replica: &PublicKey, _round: Round) {}
}
