use palisade_core::{Message, PublicKey};

/// Outbound delivery of protocol messages.
///
/// Inbound messages are handed to [`crate::ConsensusEngine::handle_message`]
/// by whoever owns the engine.
pub trait Transport: Send + Sync {
    /// Deliver a message to one replica or client
    fn send(&self, to: &PublicKey, msg: Message);

    /// Deliver a message to every peer in `peers`
    fn broadcast(&self, peers: &[PublicKey], msg: Message) {
        for peer in peers {
            self.send(peer, msg.clone());
        }
    }
}
