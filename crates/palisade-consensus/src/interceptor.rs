use std::collections::{BTreeMap, HashMap, HashSet};

use palisade_core::{Message, MessageKind, PublicKey, Round};
use tracing::debug;

/// Hook around every message a replica sends or receives.
///
/// Returning `None` drops the message. Used for fault injection in tests; the
/// default [`NoopInterceptor`] passes everything through.
pub trait MessageInterceptor: Send {
    fn intercept_outgoing(&mut self, _to: &PublicKey, msg: Message) -> Option<Message> {
        Some(msg)
    }

    fn intercept_incoming(&mut self, _from: &PublicKey, msg: Message) -> Option<Message> {
        Some(msg)
    }

    fn on_round_advanced(&mut self, _from: Round, _to: Round) {}

    /// Leader forced for `round`, overriding leader election
    fn scheduled_leader(&self, _round: Round) -> Option<PublicKey> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInterceptor;

impl MessageInterceptor for NoopInterceptor {}

/// Drops messages according to a per-round schedule.
///
/// Partitions isolate groups of replicas: an outgoing message is dropped
/// when sender and receiver are in different groups. Receivers outside every
/// group (clients) are never cut off.
#[derive(Debug, Clone)]
pub struct ScheduledInterceptor {
    me: PublicKey,
    current_round: Round,
    partitions: BTreeMap<Round, Vec<HashSet<PublicKey>>>,
    leaders: BTreeMap<Round, PublicKey>,
    /// Remaining outgoing drops per message kind
    drops: HashMap<MessageKind, usize>,
    dropped: usize,
}

impl ScheduledInterceptor {
    pub fn new(me: PublicKey) -> Self {
        ScheduledInterceptor {
            me,
            current_round: 0,
            partitions: BTreeMap::new(),
            leaders: BTreeMap::new(),
            drops: HashMap::new(),
            dropped: 0,
        }
    }

    /// Split the network into `groups` while in `round`
    pub fn partition(mut self, round: Round, groups: Vec<Vec<PublicKey>>) -> Self {
        let groups = groups.into_iter().map(|g| g.into_iter().collect()).collect();
        self.partitions.insert(round, groups);
        self
    }

    pub fn leader(mut self, round: Round, leader: PublicKey) -> Self {
        self.leaders.insert(round, leader);
        self
    }

    /// Drop the next `count` outgoing messages of `kind`
    pub fn drop_outgoing(mut self, kind: MessageKind, count: usize) -> Self {
        *self.drops.entry(kind).or_insert(0) += count;
        self
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn cut_off(&self, to: &PublicKey) -> bool {
        let Some(groups) = self.partitions.get(&self.current_round) else {
            return false;
        };
        let mine = groups.iter().find(|g| g.contains(&self.me));
        let theirs = groups.iter().find(|g| g.contains(to));
        match (mine, theirs) {
            (Some(a), Some(b)) => !std::ptr::eq(a, b),
            _ => false,
        }
    }
}

impl MessageInterceptor for ScheduledInterceptor {
    fn intercept_outgoing(&mut self, to: &PublicKey, msg: Message) -> Option<Message> {
        if self.cut_off(to) {
            debug!("Partition in round {} drops {} to {}", self.current_round, msg.kind(), to.short());
            self.dropped += 1;
            return None;
        }
        if let Some(remaining) = self.drops.get_mut(&msg.kind()) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!("Scheduled drop of {} to {}", msg.kind(), to.short());
                self.dropped += 1;
                return None;
            }
        }
        Some(msg)
    }

    fn on_round_advanced(&mut self, _from: Round, to: Round) {
        self.current_round = to;
    }

    fn scheduled_leader(&self, round: Round) -> Option<PublicKey> {
        self.leaders.get(&round).copied()
    }
}
