use std::time::Duration;

use palisade_consensus::RoundTimer;
use palisade_core::Round;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::replica::ReplicaEvent;

/// Round timer backed by a tokio sleep task.
///
/// Expiry is delivered as [`ReplicaEvent::Timeout`] on the replica's own
/// queue, so it is handled in order with incoming messages.
pub struct TokioRoundTimer {
    events: mpsc::UnboundedSender<ReplicaEvent>,
    running: Option<JoinHandle<()>>,
}

impl TokioRoundTimer {
    pub fn new(events: mpsc::UnboundedSender<ReplicaEvent>) -> Self {
        TokioRoundTimer {
            events,
            running: None,
        }
    }
}

impl RoundTimer for TokioRoundTimer {
    fn start(&mut self, round: Round, duration: Duration) {
        self.cancel();

        let events = self.events.clone();
        self.running = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(round, "Round timer fired");
            // The replica may already be gone during shutdown
            let _ = events.send(ReplicaEvent::Timeout(round));
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.abort();
        }
    }
}

impl Drop for TokioRoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
