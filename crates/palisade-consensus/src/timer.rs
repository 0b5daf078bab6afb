use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use palisade_core::Round;

/// The pacemaker's round timer.
///
/// When a started timer expires its owner must call
/// [`crate::ConsensusEngine::on_local_timeout`] with the round it was started for.
pub trait RoundTimer: Send {
    /// Arm the timer for `round`, replacing any running timer
    fn start(&mut self, round: Round, duration: Duration);

    fn cancel(&mut self);
}

/// A timer that never fires on its own; the caller decides when a round
/// expires. Used by deterministic simulations.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    armed: Arc<Mutex<Option<Round>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Round the timer is currently armed for
    pub fn armed_round(&self) -> Option<Round> {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RoundTimer for ManualTimer {
    fn start(&mut self, round: Round, _duration: Duration) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(round);
    }

    fn cancel(&mut self) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
