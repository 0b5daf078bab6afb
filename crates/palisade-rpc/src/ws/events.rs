use palisade_consensus::ConsensusEventSink;
use palisade_core::{PublicKey, Round};
use palisade_ledger::CommitReceipt;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// WebSocket event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsEvent {
    RequestCommitted {
        replica: String,
        request_id: String,
        client: String,
        block_id: String,
        round: Round,
        ledger_state_hash: String,
    },
    RoundAdvanced {
        replica: String,
        round: Round,
    },
}

impl WsEvent {
    pub fn request_committed(replica: &PublicKey, receipt: &CommitReceipt) -> Self {
        WsEvent::RequestCommitted {
            replica: replica.to_hex(),
            request_id: receipt.request_id.to_hex(),
            client: receipt.client.to_hex(),
            block_id: receipt.block_id.to_hex(),
            round: receipt.round,
            ledger_state_hash: receipt.ledger_state_hash.to_hex(),
        }
    }

    pub fn round_advanced(replica: &PublicKey, round: Round) -> Self {
        WsEvent::RoundAdvanced {
            replica: replica.to_hex(),
            round,
        }
    }

    /// Hex id of the replica that emitted the event
    pub fn replica(&self) -> &str {
        match self {
            WsEvent::RequestCommitted { replica, .. } | WsEvent::RoundAdvanced { replica, .. } => {
                replica
            }
        }
    }
}

/// Event broadcaster for WebSocket clients
pub struct EventBroadcaster {
    sender: broadcast::Sender<WsEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBroadcaster { sender }
    }

    /// Broadcast an event to all connected clients
    pub fn broadcast(&self, event: WsEvent) {
        // An error only means nobody is listening
        if let Ok(count) = self.sender.send(event) {
            debug!("Broadcast event to {} clients", count);
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ConsensusEventSink for EventBroadcaster {
    fn on_request_committed(&self, replica: &PublicKey, receipt: &CommitReceipt) {
        self.broadcast(WsEvent::request_committed(replica, receipt));
    }

    fn on_round_advanced(&self, replica: &PublicKey, round: Round) {
        self.broadcast(WsEvent::round_advanced(replica, round));
    }
}
