//! Palisade RPC - HTTP and WebSocket client surface
//!
//! Clients submit commands over HTTP, the request is signed and handed to
//! every replica, and the call returns once `f+1` replicas report the same
//! ledger-state hash. Commits and round changes stream over `/ws`.

pub mod collector;
pub mod error;
pub mod gateway;
pub mod http;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use palisade_consensus::EngineStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use http::create_router;
use ws::create_ws_router;

pub use collector::{ConsistentResponse, ResponseCollector};
pub use error::RpcError;
pub use gateway::RequestGateway;
pub use http::handlers::{LedgerResponse, StatusResponse, SubmitResponse};
pub use http::AppState;
pub use ws::{EventBroadcaster, WsEvent};

/// Latest status of every replica, written by the replica tasks
pub type StatusBoard = Arc<RwLock<Vec<EngineStatus>>>;

/// How long a submission waits for agreement before retransmitting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub retransmit_after_ms: u64,
    pub num_retransmissions: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            retransmit_after_ms: 5_000,
            num_retransmissions: 3,
        }
    }
}

/// RPC server configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP bind address
    pub http_addr: SocketAddr,
    /// Enable WebSocket
    pub enable_ws: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_ws: true,
        }
    }
}

/// RPC server
pub struct RpcServer {
    config: RpcConfig,
    app_state: Arc<AppState>,
}

impl RpcServer {
    pub fn new(config: RpcConfig, app_state: AppState) -> Self {
        RpcServer {
            config,
            app_state: Arc::new(app_state),
        }
    }

    /// Create the combined router
    pub fn router(&self) -> Router {
        let http_router = create_router(Arc::clone(&self.app_state));

        if self.config.enable_ws {
            let ws_router = create_ws_router(Arc::clone(&self.app_state.broadcaster));
            http_router.merge(ws_router)
        } else {
            http_router
        }
    }

    /// Run the RPC server
    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = self.config.http_addr;

        info!("Starting RPC server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    }
}
