//! Deterministic in-memory cluster: one global FIFO queue, manual timers.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use palisade_consensus::{
    ConsensusConfig, ConsensusEngine, ManualTimer, MessageInterceptor, NoopInterceptor, Transport,
};
use palisade_core::{ClientRequest, ClientResponse, Hash, KeyPair, Message, PublicKey, Round};
use palisade_ledger::{FileLog, LogStorage, MemoryLog};

type Envelope = (PublicKey, PublicKey, Message);

#[derive(Default)]
pub struct SimNetwork {
    queue: Mutex<VecDeque<Envelope>>,
    history: Mutex<Vec<Envelope>>,
}

impl SimNetwork {
    fn push(&self, envelope: Envelope) {
        self.history.lock().unwrap().push(envelope.clone());
        self.queue.lock().unwrap().push_back(envelope);
    }

    fn pop(&self) -> Option<Envelope> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn history(&self) -> Vec<Envelope> {
        self.history.lock().unwrap().clone()
    }
}

struct SimTransport {
    me: PublicKey,
    net: Arc<SimNetwork>,
}

impl Transport for SimTransport {
    fn send(&self, to: &PublicKey, msg: Message) {
        self.net.push((self.me, *to, msg));
    }
}

pub struct Cluster {
    pub net: Arc<SimNetwork>,
    pub replicas: Vec<ConsensusEngine>,
    pub keys: Vec<KeyPair>,
    pub timers: Vec<ManualTimer>,
    pub client: KeyPair,
    pub responses: Vec<ClientResponse>,
    pub down: HashSet<usize>,
}

impl Cluster {
    pub fn new(n: usize, f: usize) -> Self {
        Self::build(n, f, |_| Box::new(NoopInterceptor), |_| Box::new(MemoryLog::new()))
    }

    pub fn with_interceptors(
        n: usize,
        f: usize,
        interceptor: impl Fn(&PublicKey) -> Box<dyn MessageInterceptor>,
    ) -> Self {
        Self::build(n, f, interceptor, |_| Box::new(MemoryLog::new()))
    }

    pub fn with_ledger_dir(n: usize, f: usize, dir: &Path) -> Self {
        Self::build(
            n,
            f,
            |_| Box::new(NoopInterceptor),
            |i| Box::new(FileLog::open(dir.join(format!("replica-{i}.log"))).unwrap()),
        )
    }

    fn build(
        n: usize,
        f: usize,
        interceptor: impl Fn(&PublicKey) -> Box<dyn MessageInterceptor>,
        storage: impl Fn(usize) -> Box<dyn LogStorage>,
    ) -> Self {
        let config = ConsensusConfig {
            num_validators: n,
            f,
            ..ConsensusConfig::default()
        };
        let net = Arc::new(SimNetwork::default());
        let keys: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate()).collect();
        let validators: Vec<PublicKey> = keys.iter().map(|k| k.public).collect();

        let mut replicas = Vec::new();
        let mut timers = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            let timer = ManualTimer::new();
            let transport = Arc::new(SimTransport {
                me: key.public,
                net: net.clone(),
            });
            let mut engine = ConsensusEngine::new(
                config.clone(),
                key.clone(),
                validators.clone(),
                storage(i),
                transport,
                Box::new(timer.clone()),
            )
            .unwrap()
            .with_interceptor(interceptor(&key.public));
            engine.start().unwrap();
            replicas.push(engine);
            timers.push(timer);
        }

        Cluster {
            net,
            replicas,
            keys,
            timers,
            client: KeyPair::generate(),
            responses: Vec::new(),
            down: HashSet::new(),
        }
    }

    pub fn index_of(&self, id: &PublicKey) -> Option<usize> {
        self.keys.iter().position(|k| k.public == *id)
    }

    /// Send a client request to every replica
    pub fn submit(&mut self, tx: &str) -> ClientRequest {
        let request = ClientRequest::new(&self.client, tx.to_string()).unwrap();
        self.resubmit(&request);
        request
    }

    pub fn resubmit(&mut self, request: &ClientRequest) {
        for key in &self.keys {
            self.net
                .push((self.client.public, key.public, Message::ClientRequest(request.clone())));
        }
    }

    /// Deliver queued messages until the network is quiet
    pub fn run(&mut self) -> usize {
        let mut delivered = 0;
        while let Some((from, to, msg)) = self.net.pop() {
            delivered += 1;
            assert!(delivered < 100_000, "cluster did not quiesce");
            if to == self.client.public {
                if let Message::ClientResponse(response) = msg {
                    self.responses.push(response);
                }
                continue;
            }
            match self.index_of(&to) {
                Some(i) if !self.down.contains(&i) => self.replicas[i].handle_message(&from, msg),
                _ => {}
            }
        }
        delivered
    }

    /// Expire every armed round timer of a live replica
    pub fn fire_timers(&mut self) {
        for i in 0..self.replicas.len() {
            if self.down.contains(&i) {
                continue;
            }
            if let Some(round) = self.timers[i].armed_round() {
                self.replicas[i].on_local_timeout(round);
            }
        }
    }

    /// Alternate delivery and timer expiry until `done` holds
    pub fn drive(&mut self, max_timeouts: usize, done: impl Fn(&Cluster) -> bool) -> bool {
        for _ in 0..=max_timeouts {
            self.run();
            if done(self) {
                return true;
            }
            self.fire_timers();
        }
        self.run();
        done(self)
    }

    pub fn live(&self) -> impl Iterator<Item = &ConsensusEngine> {
        self.replicas
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.down.contains(i))
            .map(|(_, r)| r)
    }

    pub fn log(&self, i: usize) -> Vec<String> {
        self.replicas[i]
            .ledger()
            .get_log_chunk(0)
            .unwrap()
            .into_iter()
            .map(|e| e.command)
            .collect()
    }

    pub fn responses_for(&self, request_id: &Hash) -> Vec<&ClientResponse> {
        self.responses
            .iter()
            .filter(|r| r.request_id == *request_id)
            .collect()
    }

    pub fn leader_of(&self, round: Round) -> PublicKey {
        self.replicas[0].leader(round)
    }
}
