use palisade_consensus::ConsensusEngine;
use palisade_core::{Message, PublicKey, Round};
use palisade_rpc::StatusBoard;
use tokio::sync::mpsc;
use tracing::info;

/// Work item of a replica task
#[derive(Debug)]
pub enum ReplicaEvent {
    Message { from: PublicKey, msg: Message },
    /// The round timer started for this round expired
    Timeout(Round),
}

/// Drive one replica: the engine is owned by this task alone and handles
/// one event at a time.
pub async fn run_replica(
    index: usize,
    mut engine: ConsensusEngine,
    mut events: mpsc::UnboundedReceiver<ReplicaEvent>,
    board: StatusBoard,
) {
    info!("Replica {} ({}) running", index, engine.id().short());
    let mut published = engine.status();

    while let Some(event) = events.recv().await {
        match event {
            ReplicaEvent::Message { from, msg } => engine.handle_message(&from, msg),
            ReplicaEvent::Timeout(round) => engine.on_local_timeout(round),
        }

        let status = engine.status();
        if status != published {
            if let Some(slot) = board.write().await.get_mut(index) {
                *slot = status.clone();
            }
            published = status;
        }
    }

    info!("Replica {} stopped", index);
}
