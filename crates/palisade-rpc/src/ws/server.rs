use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::events::{EventBroadcaster, WsEvent};

/// `/ws?replica=<hex>` limits the stream to one replica's events
#[derive(Debug, Default, Deserialize)]
pub struct WsFilter {
    pub replica: Option<String>,
}

impl WsFilter {
    fn admits(&self, event: &WsEvent) -> bool {
        self.replica
            .as_deref()
            .map_or(true, |replica| replica.eq_ignore_ascii_case(event.replica()))
    }
}

/// Create WebSocket router streaming commit and round events
pub fn create_ws_router(broadcaster: Arc<EventBroadcaster>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(broadcaster)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(filter): Query<WsFilter>,
    State(broadcaster): State<Arc<EventBroadcaster>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster, filter))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<EventBroadcaster>, filter: WsFilter) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = broadcaster.subscribe();

    info!("WebSocket subscriber connected (filter: {:?})", filter.replica);

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket subscriber skipped {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !filter.admits(&event) {
                continue;
            }

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Subscribers only listen; axum answers pings
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!("WebSocket read failed: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket subscriber disconnected");
}
