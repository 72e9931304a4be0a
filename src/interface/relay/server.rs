//! Websocket relay server
//!
//! `GET /relay/:conversation_id` upgrades to a websocket. Every text frame
//! that parses as a signaling message is re-broadcast to all sockets of the
//! same conversation, the sender included. The relay never inspects call
//! state; addressing and call id filtering happen in the clients.

use super::metrics::metrics_handler;
use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::{SignalingMessage, SignalingTransport};
use crate::infrastructure::signaling::InMemoryRelay;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared relay state
pub struct RelayState {
    hub: Arc<InMemoryRelay>,
    connections: AtomicUsize,
}

impl RelayState {
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(InMemoryRelay::new(capacity)),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn hub(&self) -> Arc<InMemoryRelay> {
        self.hub.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    conversations: usize,
}

pub struct RelayServer {
    state: Arc<RelayState>,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(RelayState::new(capacity)),
            metrics: None,
        }
    }

    /// Expose `/metrics` from the given recorder handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn state(&self) -> Arc<RelayState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/relay/:conversation_id", get(relay_handler))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics {
            let metrics_routes = Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(handle.clone());
            router = router.merge(metrics_routes);
        }

        router
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Signaling relay listening on {}", addr);
        }
        axum::serve(listener, self.router()).await
    }
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.connection_count(),
        conversations: state.hub.conversation_count().await,
    })
}

async fn relay_handler(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<String>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let conversation = ConversationId::new(conversation_id);
    ws.on_upgrade(move |socket| handle_socket(socket, conversation, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, conversation: ConversationId, state: Arc<RelayState>) {
    // Subscribe before reading so nothing published after the upgrade is missed
    let mut outgoing = match state.hub.subscribe(&conversation).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Could not subscribe to conversation {}: {}", conversation, e);
            return;
        }
    };

    let open = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::gauge!("peercall_relay_connections").set(open as f64);
    info!("Relay connection opened for conversation {}", conversation);

    let (mut sender, mut receiver) = socket.split();

    let send_conversation = conversation.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outgoing.next().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize relay frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                debug!("Relay client on {} went away", send_conversation);
                break;
            }
        }
    });

    let hub = state.hub();
    let recv_conversation = conversation.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let message: SignalingMessage = match serde_json::from_str(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            debug!("Dropping malformed frame on {}: {}", recv_conversation, e);
                            metrics::counter!("peercall_relay_rejected_total").increment(1);
                            continue;
                        }
                    };

                    debug!(
                        "Relaying {} for call {} on {}",
                        message.type_name(),
                        message.call_id,
                        recv_conversation
                    );
                    metrics::counter!("peercall_relay_forwarded_total", "type" => message.type_name())
                        .increment(1);
                    if let Err(e) = hub.publish(&recv_conversation, &message).await {
                        warn!("Relay publish on {} failed: {}", recv_conversation, e);
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Relay socket error on {}: {}", recv_conversation, e);
                    break;
                }
            }
        }
    });

    // Wait for the aborted half too, so its subscription is gone before pruning
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    let open = state.connections.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    metrics::gauge!("peercall_relay_connections").set(open as f64);
    let pruned = state.hub.prune().await;
    info!(
        "Relay connection closed for conversation {} ({} idle conversation(s) pruned)",
        conversation, pruned
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_counts() {
        let server = RelayServer::new(16);
        let Json(health) = health_handler(State(server.state())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.connections, 0);
        assert_eq!(health.conversations, 0);
    }

    #[tokio::test]
    async fn test_serve_accepts_http() {
        let server = RelayServer::new(16);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/relay/conv-1", addr))
            .await
            .unwrap();
        drop(socket);
    }
}
