use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use palisade_consensus::EngineStatus;
use palisade_core::{hash_blake3, ClientRequest, KeyPair};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collector::{ConsistentResponse, ResponseCollector};
use crate::error::RpcError;
use crate::gateway::RequestGateway;
use crate::ws::events::EventBroadcaster;
use crate::{ClientConfig, StatusBoard};

/// Application state shared with handlers
pub struct AppState {
    pub board: StatusBoard,
    /// Identity requests are signed with; replicas answer to it
    pub client: KeyPair,
    pub gateway: Arc<dyn RequestGateway>,
    pub collector: Arc<ResponseCollector>,
    /// Ledger file of each replica, indexed like the status board
    pub ledger_paths: Vec<PathBuf>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub client_config: ClientConfig,
}

// Response types

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub num_replicas: usize,
    /// Whether every replica reports the same ledger-state hash
    pub consistent: bool,
    pub replicas: Vec<EngineStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub request_id: String,
    pub ledger_state_hash: String,
    pub replicas: Vec<String>,
    pub attempts: u32,
}

impl SubmitResponse {
    fn new(result: ConsistentResponse, attempts: u32) -> Self {
        SubmitResponse {
            request_id: result.request_id.to_hex(),
            ledger_state_hash: result.ledger_state_hash.to_hex(),
            replicas: result.replicas.iter().map(|r| r.to_hex()).collect(),
            attempts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub replica: usize,
    pub entries: Vec<String>,
    pub ledger_state_hash: String,
}

// Request types

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub transaction: String,
}

// Handlers

/// GET /status - Progress of every replica
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let replicas = state.board.read().await.clone();
    let consistent = replicas
        .windows(2)
        .all(|pair| pair[0].ledger_state_hash == pair[1].ledger_state_hash);

    Json(StatusResponse {
        num_replicas: replicas.len(),
        consistent,
        replicas,
    })
}

/// POST /request - Submit a command and wait for f+1 matching responses
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, RpcError> {
    let request = ClientRequest::new(&state.client, body.transaction)?;
    if !request.is_single_line() {
        return Err(RpcError::BadRequest(
            "transaction must be a single line".to_string(),
        ));
    }
    let mut response = state.collector.register(request.id);
    let wait = Duration::from_millis(state.client_config.retransmit_after_ms);

    let mut attempts = 0;
    loop {
        attempts += 1;
        state.gateway.submit(&request);

        match tokio::time::timeout(wait, &mut response).await {
            Ok(Ok(result)) => {
                info!("Request {} committed after {} attempt(s)", request.id.short(), attempts);
                return Ok(Json(SubmitResponse::new(result, attempts)));
            }
            Ok(Err(_)) => {
                return Err(RpcError::Internal(
                    "response collector dropped the request".to_string(),
                ));
            }
            Err(_) if attempts <= state.client_config.num_retransmissions => {
                warn!("Retransmitting request {}", request.id.short());
                state.collector.reset(&request.id);
            }
            Err(_) => {
                state.collector.forget(&request.id);
                return Err(RpcError::Timeout(format!(
                    "no f+1 agreement on request {} after {} attempts",
                    request.id.to_hex(),
                    attempts
                )));
            }
        }
    }
}

/// GET /ledger/{replica} - A replica's committed log
pub async fn get_ledger(
    State(state): State<Arc<AppState>>,
    Path(replica): Path<usize>,
) -> Result<Json<LedgerResponse>, RpcError> {
    let path = state
        .ledger_paths
        .get(replica)
        .ok_or_else(|| RpcError::NotFound(format!("replica {}", replica)))?;

    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(RpcError::Internal(e.to_string())),
    };

    Ok(Json(LedgerResponse {
        replica,
        entries: content.lines().map(str::to_string).collect(),
        ledger_state_hash: hash_blake3(content.as_bytes()).to_hex(),
    }))
}
