use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use palisade_consensus::ConsensusConfig;
use palisade_core::KeyPair;
use palisade_rpc::ClientConfig;
use serde::{Deserialize, Serialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Protocol parameters shared by every replica
    pub consensus: ConsensusConfig,

    /// Secret key (hex) of every validator run by this node
    pub validator_keys: Vec<String>,

    /// Secret key (hex) the RPC server signs client requests with
    pub client_key: String,

    /// Directory holding one ledger file per replica
    pub ledger_dir: PathBuf,

    /// RPC bind address
    pub rpc_addr: SocketAddr,

    /// Enable WebSocket
    pub enable_ws: bool,

    /// Retransmission policy of submitted requests
    pub client: ClientConfig,
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.consensus.validate()?;
        if self.validator_keys.len() != self.consensus.num_validators {
            bail!(
                "{} validator keys configured for {} validators",
                self.validator_keys.len(),
                self.consensus.num_validators
            );
        }
        Ok(())
    }

    pub fn validator_keypairs(&self) -> Result<Vec<KeyPair>> {
        self.validator_keys
            .iter()
            .map(|key| Ok(KeyPair::from_secret_hex(key)?))
            .collect()
    }

    pub fn client_keypair(&self) -> Result<KeyPair> {
        Ok(KeyPair::from_secret_hex(&self.client_key)?)
    }

    /// Ledger file of the replica at `index`
    pub fn ledger_path(&self, index: usize) -> PathBuf {
        self.ledger_dir.join(format!("replica-{index}.log"))
    }
}

/// Generate a configuration for a cluster tolerating `f` faults
pub fn generate_sample_config(f: usize) -> NodeConfig {
    let consensus = ConsensusConfig {
        num_validators: 3 * f + 1,
        f,
        ..ConsensusConfig::default()
    };
    let validator_keys = (0..consensus.num_validators)
        .map(|_| KeyPair::generate().secret.to_hex())
        .collect();

    NodeConfig {
        consensus,
        validator_keys,
        client_key: KeyPair::generate().secret.to_hex(),
        ledger_dir: PathBuf::from("./palisade-data"),
        rpc_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        enable_ws: true,
        client: ClientConfig::default(),
    }
}
