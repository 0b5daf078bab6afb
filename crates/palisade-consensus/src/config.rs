use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

/// Protocol parameters shared by every replica of a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub num_validators: usize,
    /// Number of Byzantine replicas tolerated
    pub f: usize,
    /// Expected one-way message delay; the round timer is four times this
    pub transmission_time_delta_ms: u64,
    /// Rounds of QC signers considered active by reputation election
    pub window_size: usize,
    /// Number of recent leaders excluded by reputation election
    pub exclude_size: usize,
    /// Committed blocks remembered for reputation election
    pub commit_history: usize,
    /// Elected leaders remembered per round
    pub leader_history: usize,
    /// Committed results cached for retransmitted requests
    pub mempool_cache_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            num_validators: 4,
            f: 1,
            transmission_time_delta_ms: 500,
            window_size: 2,
            exclude_size: 1,
            commit_history: 32,
            leader_history: 32,
            mempool_cache_size: 1_000,
        }
    }
}

impl ConsensusConfig {
    /// 2f+1
    pub fn quorum(&self) -> usize {
        2 * self.f + 1
    }

    /// f+1, enough to include one honest replica
    pub fn weak_quorum(&self) -> usize {
        self.f + 1
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(4 * self.transmission_time_delta_ms)
    }

    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.num_validators < 3 * self.f + 1 {
            return Err(ConsensusError::InvalidConfig(format!(
                "{} validators cannot tolerate {} faults",
                self.num_validators, self.f
            )));
        }
        if self.transmission_time_delta_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "transmission_time_delta_ms must be positive".to_string(),
            ));
        }
        if self.window_size == 0 || self.commit_history == 0 || self.leader_history == 0 {
            return Err(ConsensusError::InvalidConfig(
                "window_size, commit_history and leader_history must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
