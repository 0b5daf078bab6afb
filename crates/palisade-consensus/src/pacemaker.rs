//! Round synchronization.
//!
//! Rounds advance on a QC for the current round or later, or on a TC. The
//! round timer only runs while there is client work to make progress on.

use std::collections::BTreeMap;
use std::time::Duration;

use palisade_core::{KeyPair, QuorumCertificate, Round, TimeoutCertificate, TimeoutMsg};
use tracing::{debug, info};

use crate::error::ConsensusError;
use crate::qc::TimeoutAggregator;
use crate::timer::RoundTimer;

/// What a remote timeout message triggered
#[derive(Debug, Default)]
pub struct TimeoutProgress {
    /// f+1 replicas gave up on the round; join them
    pub local_timeout: bool,
    pub tc: Option<TimeoutCertificate>,
}

pub struct Pacemaker {
    keypair: KeyPair,
    current_round: Round,
    last_tc: Option<TimeoutCertificate>,
    pending_timeouts: BTreeMap<Round, TimeoutAggregator>,
    timer: Box<dyn RoundTimer>,
    round_duration: Duration,
    quorum: usize,
    weak_quorum: usize,
    timer_round: Option<Round>,
    timed_out_round: Option<Round>,
}

impl Pacemaker {
    pub fn new(
        keypair: KeyPair,
        timer: Box<dyn RoundTimer>,
        round_duration: Duration,
        quorum: usize,
        weak_quorum: usize,
    ) -> Self {
        Pacemaker {
            keypair,
            current_round: 0,
            last_tc: None,
            pending_timeouts: BTreeMap::new(),
            timer,
            round_duration,
            quorum,
            weak_quorum,
            timer_round: None,
            timed_out_round: None,
        }
    }

    pub fn current_round(&self) -> Round {
        self.current_round
    }

    pub fn last_tc(&self) -> Option<&TimeoutCertificate> {
        self.last_tc.as_ref()
    }

    pub fn timer_running(&self) -> bool {
        self.timer_round.is_some()
    }

    pub fn timeouts_collected(&self, round: Round) -> usize {
        self.pending_timeouts.get(&round).map_or(0, |a| a.len())
    }

    fn enter_round(&mut self, round: Round, has_work: bool) {
        self.stop_timer();
        self.current_round = round;
        self.pending_timeouts = self.pending_timeouts.split_off(&round);
        self.ensure_timer(has_work);
    }

    /// Arm the timer for the current round if there is work and it is not
    /// already running
    pub fn ensure_timer(&mut self, has_work: bool) {
        if has_work && self.timer_round != Some(self.current_round) {
            self.timer.start(self.current_round, self.round_duration);
            self.timer_round = Some(self.current_round);
            debug!("Round timer started for round {}", self.current_round);
        }
    }

    pub fn stop_timer(&mut self) {
        if self.timer_round.take().is_some() {
            self.timer.cancel();
        }
    }

    /// Re-arm after the local timeout fired so the timeout is retransmitted
    pub fn restart_timer(&mut self, has_work: bool) {
        self.stop_timer();
        self.ensure_timer(has_work);
    }

    pub fn advance_round_on_qc(&mut self, qc: &QuorumCertificate, has_work: bool) -> bool {
        if qc.block_round() < self.current_round {
            return false;
        }
        let from = self.current_round;
        self.last_tc = None;
        self.enter_round(qc.block_round() + 1, has_work);
        info!("Round advanced on QC from {} to {}", from, self.current_round);
        true
    }

    pub fn advance_round_on_tc(&mut self, tc: Option<&TimeoutCertificate>, has_work: bool) -> bool {
        let Some(tc) = tc else { return false };
        if tc.current_round < self.current_round {
            return false;
        }
        let from = self.current_round;
        self.last_tc = Some(tc.clone());
        self.enter_round(tc.current_round + 1, has_work);
        info!("Round advanced on TC from {} to {}", from, self.current_round);
        true
    }

    /// Record that this replica timed out `round`; false if it already had
    pub fn mark_local_timeout(&mut self, round: Round) -> bool {
        if self.timed_out_round >= Some(round) {
            return false;
        }
        self.timed_out_round = Some(round);
        true
    }

    /// Collect a timeout message. Messages for past rounds are ignored.
    ///
    /// The `f+1`-th timeout for any round at or above the current one forces
    /// a local timeout of the current round, at most once per round.
    pub fn process_remote_timeout(&mut self, msg: &TimeoutMsg) -> Result<TimeoutProgress, ConsensusError> {
        let mut progress = TimeoutProgress::default();
        if msg.current_round < self.current_round {
            debug!(
                "Stale timeout for round {} from {} (current {})",
                msg.current_round,
                msg.sender.short(),
                self.current_round
            );
            return Ok(progress);
        }

        let aggregator = self
            .pending_timeouts
            .entry(msg.current_round)
            .or_insert_with(|| TimeoutAggregator::new(msg.current_round));
        if !aggregator.add(msg) {
            return Ok(progress);
        }
        let collected = aggregator.len();
        debug!(
            "Timeout {}/{} for round {} from {}",
            collected,
            self.quorum,
            msg.current_round,
            msg.sender.short()
        );

        if collected == self.weak_quorum && self.timed_out_round < Some(self.current_round) {
            progress.local_timeout = true;
        }
        if collected == self.quorum {
            let tc = aggregator.form(&self.keypair)?;
            info!("TC formed for round {}", tc.current_round);
            progress.tc = Some(tc);
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimer;
    use palisade_core::SyncMetadata;

    fn pacemaker(timer: &ManualTimer) -> (Pacemaker, Vec<KeyPair>) {
        let validators: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let pm = Pacemaker::new(
            validators[0].clone(),
            Box::new(timer.clone()),
            Duration::from_millis(100),
            3,
            2,
        );
        (pm, validators)
    }

    fn timeout(v: &KeyPair, round: Round) -> TimeoutMsg {
        let genesis = QuorumCertificate::genesis().unwrap();
        TimeoutMsg::new(v, round, genesis, None, None, SyncMetadata::default()).unwrap()
    }

    #[test]
    fn test_timer_only_runs_with_work() {
        let timer = ManualTimer::new();
        let (mut pm, _) = pacemaker(&timer);
        let genesis = QuorumCertificate::genesis().unwrap();

        assert!(pm.advance_round_on_qc(&genesis, false));
        assert_eq!(pm.current_round(), 1);
        assert_eq!(timer.armed_round(), None);

        pm.ensure_timer(true);
        assert_eq!(timer.armed_round(), Some(1));

        pm.stop_timer();
        assert!(!pm.timer_running());
        assert_eq!(timer.armed_round(), None);
    }

    #[test]
    fn test_stale_qc_does_not_advance() {
        let timer = ManualTimer::new();
        let (mut pm, _) = pacemaker(&timer);
        let genesis = QuorumCertificate::genesis().unwrap();
        pm.advance_round_on_qc(&genesis, true);
        assert!(pm.advance_round_on_tc(None, true) == false);

        // a QC for round 0 is now behind the current round
        assert!(!pm.advance_round_on_qc(&genesis, true));
        assert_eq!(pm.current_round(), 1);
    }

    #[test]
    fn test_timeout_thresholds() {
        let timer = ManualTimer::new();
        let (mut pm, vs) = pacemaker(&timer);
        pm.advance_round_on_qc(&QuorumCertificate::genesis().unwrap(), true);

        let first = pm.process_remote_timeout(&timeout(&vs[1], 1)).unwrap();
        assert!(!first.local_timeout && first.tc.is_none());

        // duplicate sender is not counted
        let dup = pm.process_remote_timeout(&timeout(&vs[1], 1)).unwrap();
        assert!(!dup.local_timeout);
        assert_eq!(pm.timeouts_collected(1), 1);

        let second = pm.process_remote_timeout(&timeout(&vs[2], 1)).unwrap();
        assert!(second.local_timeout);
        assert!(second.tc.is_none());

        let third = pm.process_remote_timeout(&timeout(&vs[3], 1)).unwrap();
        let tc = third.tc.unwrap();
        assert_eq!(tc.current_round, 1);
        assert_eq!(tc.signers.len(), 3);

        // the fourth timeout forms nothing new
        let fourth = pm.process_remote_timeout(&timeout(&vs[0], 1)).unwrap();
        assert!(fourth.tc.is_none());

        assert!(pm.advance_round_on_tc(Some(&tc), true));
        assert_eq!(pm.current_round(), 2);
        assert_eq!(pm.last_tc().map(|t| t.current_round), Some(1));
        assert_eq!(timer.armed_round(), Some(2));
        assert_eq!(pm.timeouts_collected(1), 0);
    }

    #[test]
    fn test_local_timeout_not_repeated() {
        let timer = ManualTimer::new();
        let (mut pm, vs) = pacemaker(&timer);
        pm.advance_round_on_qc(&QuorumCertificate::genesis().unwrap(), true);

        assert!(pm.mark_local_timeout(1));
        assert!(!pm.mark_local_timeout(1));

        pm.process_remote_timeout(&timeout(&vs[1], 1)).unwrap();
        let progress = pm.process_remote_timeout(&timeout(&vs[2], 1)).unwrap();
        assert!(!progress.local_timeout);
    }

    #[test]
    fn test_weak_quorum_for_later_round_forces_timeout() {
        let timer = ManualTimer::new();
        let (mut pm, vs) = pacemaker(&timer);
        pm.advance_round_on_qc(&QuorumCertificate::genesis().unwrap(), true);

        let first = pm.process_remote_timeout(&timeout(&vs[1], 2)).unwrap();
        assert!(!first.local_timeout);
        let second = pm.process_remote_timeout(&timeout(&vs[2], 2)).unwrap();
        assert!(second.local_timeout);
        assert_eq!(pm.current_round(), 1);

        // once the current round timed out, later weak quorums change nothing
        assert!(pm.mark_local_timeout(1));
        pm.process_remote_timeout(&timeout(&vs[1], 3)).unwrap();
        let again = pm.process_remote_timeout(&timeout(&vs[2], 3)).unwrap();
        assert!(!again.local_timeout);
    }

    #[test]
    fn test_stale_timeout_ignored() {
        let timer = ManualTimer::new();
        let (mut pm, vs) = pacemaker(&timer);
        pm.advance_round_on_qc(&QuorumCertificate::genesis().unwrap(), true);

        pm.process_remote_timeout(&timeout(&vs[1], 0)).unwrap();
        assert_eq!(pm.timeouts_collected(0), 0);

        // a future round is buffered
        pm.process_remote_timeout(&timeout(&vs[1], 5)).unwrap();
        assert_eq!(pm.timeouts_collected(5), 1);
    }
}
