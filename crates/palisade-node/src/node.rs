use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use palisade_consensus::ConsensusEngine;
use palisade_core::{KeyPair, PublicKey};
use palisade_ledger::FileLog;
use palisade_rpc::{
    AppState, ClientConfig, EventBroadcaster, ResponseCollector, RpcConfig, RpcServer,
    StatusBoard,
};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::NodeConfig;
use crate::replica::run_replica;
use crate::timer::TokioRoundTimer;
use crate::transport::{ChannelGateway, ChannelTransport, Routes};

/// Replicas of one cluster running as tasks of this process
pub struct LocalCluster {
    pub board: StatusBoard,
    pub client: KeyPair,
    pub routes: Arc<Routes>,
    pub collector: Arc<ResponseCollector>,
    pub broadcaster: Arc<EventBroadcaster>,
    ledger_paths: Vec<PathBuf>,
    replicas: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Start every configured validator. With `fresh`, existing ledger
    /// files are removed first.
    pub async fn spawn(config: &NodeConfig, fresh: bool) -> Result<Self> {
        config.validate()?;
        let keys = config.validator_keypairs()?;
        let client = config.client_keypair()?;
        let validators: Vec<PublicKey> = keys.iter().map(|k| k.public).collect();

        let collector = Arc::new(ResponseCollector::new(
            validators.clone(),
            config.consensus.weak_quorum(),
        ));
        let broadcaster = Arc::new(EventBroadcaster::default());

        let mut queues = HashMap::new();
        let mut inboxes = Vec::new();
        for key in &keys {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.insert(key.public, tx.clone());
            inboxes.push((tx, rx));
        }
        let routes = Arc::new(Routes::new(queues, client.public, Arc::clone(&collector)));

        let board: StatusBoard = Arc::new(RwLock::new(Vec::with_capacity(keys.len())));
        let mut ledger_paths = Vec::with_capacity(keys.len());
        let mut replicas = Vec::with_capacity(keys.len());

        for (index, (key, (tx, rx))) in keys.into_iter().zip(inboxes).enumerate() {
            let path = config.ledger_path(index);
            if fresh && path.exists() {
                std::fs::remove_file(&path)?;
            }
            let storage = FileLog::open(path.clone())?;
            let transport = Arc::new(ChannelTransport::new(key.public, Arc::clone(&routes)));

            let mut engine = ConsensusEngine::new(
                config.consensus.clone(),
                key,
                validators.clone(),
                Box::new(storage),
                transport,
                Box::new(TokioRoundTimer::new(tx)),
            )?
            .with_event_sink(broadcaster.clone());
            engine.start()?;

            board.write().await.push(engine.status());
            ledger_paths.push(path);
            replicas.push(tokio::spawn(run_replica(index, engine, rx, Arc::clone(&board))));
        }

        info!(
            "Started {} replicas tolerating {} faults",
            replicas.len(),
            config.consensus.f
        );

        Ok(LocalCluster {
            board,
            client,
            routes,
            collector,
            broadcaster,
            ledger_paths,
            replicas,
        })
    }

    /// State for the RPC server in front of this cluster
    pub fn app_state(&self, client_config: ClientConfig) -> AppState {
        AppState {
            board: Arc::clone(&self.board),
            client: self.client.clone(),
            gateway: Arc::new(ChannelGateway::new(Arc::clone(&self.routes))),
            collector: Arc::clone(&self.collector),
            ledger_paths: self.ledger_paths.clone(),
            broadcaster: Arc::clone(&self.broadcaster),
            client_config,
        }
    }

    pub fn shutdown(&mut self) {
        for replica in self.replicas.drain(..) {
            replica.abort();
        }
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The Palisade node: a local cluster behind the RPC server
pub struct Node {
    config: NodeConfig,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Node { config })
    }

    /// Run until the RPC server fails or the process is interrupted
    pub async fn run(self, fresh: bool) -> Result<()> {
        info!("Starting Palisade node");

        let mut cluster = LocalCluster::spawn(&self.config, fresh).await?;

        let rpc_config = RpcConfig {
            http_addr: self.config.rpc_addr,
            enable_ws: self.config.enable_ws,
        };
        let server = RpcServer::new(rpc_config, cluster.app_state(self.config.client.clone()));

        tokio::select! {
            result = server.run() => result?,
            _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        }

        cluster.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use palisade_core::{hash_blake3, ClientRequest};
    use palisade_rpc::RequestGateway;

    use crate::config::generate_sample_config;

    fn test_config(dir: &std::path::Path) -> NodeConfig {
        let mut config = generate_sample_config(1);
        config.consensus.transmission_time_delta_ms = 50;
        config.ledger_dir = dir.to_path_buf();
        config
    }

    async fn wait_for(board: &StatusBoard, done: impl Fn(&[palisade_consensus::EngineStatus]) -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if done(&board.read().await) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("cluster did not converge");
    }

    #[tokio::test]
    async fn test_local_cluster_commits_request() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut cluster = LocalCluster::spawn(&config, true).await.unwrap();
        assert_eq!(cluster.board.read().await.len(), 4);

        let request = ClientRequest::new(&cluster.client, "hello".to_string()).unwrap();
        let waiting = cluster.collector.register(request.id);
        ChannelGateway::new(Arc::clone(&cluster.routes)).submit(&request);

        let result = tokio::time::timeout(Duration::from_secs(10), waiting)
            .await
            .expect("no f+1 agreement")
            .unwrap();
        assert_eq!(result.ledger_state_hash, hash_blake3(b"hello\n"));

        wait_for(&cluster.board, |replicas| replicas.iter().all(|r| r.log_index == 1)).await;
        for index in 0..4 {
            let content = std::fs::read_to_string(config.ledger_path(index)).unwrap();
            assert_eq!(content, "hello\n");
        }

        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_fresh_start_clears_ledgers() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(config.ledger_path(0), "stale\n").unwrap();

        let cluster = LocalCluster::spawn(&config, true).await.unwrap();
        assert!(cluster.board.read().await.iter().all(|r| r.log_index == 0));
    }

    #[test]
    fn test_node_rejects_invalid_config() {
        let mut config = generate_sample_config(1);
        config.consensus.f = 2;
        assert!(Node::new(config).is_err());
    }
}
