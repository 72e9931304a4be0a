//! Websocket relay client
//!
//! Keeps one websocket link per conversation to `{base_url}/relay/{id}`.
//! Frames are JSON-encoded [`SignalingMessage`]s; the relay echoes every
//! frame to all members of the conversation, sender included.

use super::broadcast_stream;
use crate::config::RelayConfig;
use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::{SignalingMessage, SignalingStream, SignalingTransport, TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

const RECONNECT_INITIAL: Duration = Duration::from_millis(100);
const RECONNECT_MAX: Duration = Duration::from_secs(5);

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channels for one conversation. Both outlive any single socket.
#[derive(Clone)]
struct RelayLink {
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: broadcast::Sender<SignalingMessage>,
}

type LinkMap = Arc<Mutex<HashMap<ConversationId, RelayLink>>>;

pub struct WsRelayTransport {
    base_url: String,
    capacity: usize,
    links: LinkMap,
}

impl WsRelayTransport {
    pub fn new(base_url: impl Into<String>, capacity: usize) -> Self {
        Self {
            base_url: base_url.into(),
            capacity: capacity.max(1),
            links: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Client for the relay at `relay.url`
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.url.clone(), config.channel_capacity)
    }

    fn url_for(&self, conversation: &ConversationId) -> String {
        format!(
            "{}/relay/{}",
            self.base_url.trim_end_matches('/'),
            conversation
        )
    }

    /// Existing link or a freshly connected one.
    ///
    /// Only the first dial is reported to the caller; after that the link
    /// re-dials on its own and keeps its subscribers.
    async fn link(&self, conversation: &ConversationId) -> Result<RelayLink, TransportError> {
        if let Some(link) = self.links.lock().await.get(conversation) {
            return Ok(link.clone());
        }

        let url = self.url_for(conversation);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut links = self.links.lock().await;
        if let Some(link) = links.get(conversation) {
            // Lost a dialing race; ours is closed on drop
            return Ok(link.clone());
        }
        info!("Connected to relay at {}", url);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, _) = broadcast::channel(self.capacity);
        tokio::spawn(supervise(url, socket, out_rx, in_tx.clone()));

        let link = RelayLink {
            outgoing: out_tx,
            incoming: in_tx,
        };
        links.insert(conversation.clone(), link.clone());
        Ok(link)
    }
}

/// Owns the socket of one link, re-dialing whenever it drops.
/// Runs until the transport holding `outgoing` is gone.
async fn supervise(
    url: String,
    mut socket: RelaySocket,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    incoming: broadcast::Sender<SignalingMessage>,
) {
    let mut pending = VecDeque::new();
    loop {
        if !pump(socket, &mut outgoing, &incoming, &mut pending).await {
            break;
        }
        warn!("Relay link to {} dropped, reconnecting", url);
        match reconnect(&url, &mut outgoing, &mut pending).await {
            Some(next) => socket = next,
            None => break,
        }
    }
    info!("Relay link to {} closed", url);
}

/// Shuttle frames over one socket. `true` when the socket ended, `false`
/// when the link itself was dropped.
async fn pump(
    socket: RelaySocket,
    outgoing: &mut mpsc::UnboundedReceiver<Message>,
    incoming: &broadcast::Sender<SignalingMessage>,
    pending: &mut VecDeque<Message>,
) -> bool {
    let (mut sink, mut stream) = socket.split();

    // Frames that could not be written before the last drop go first
    while let Some(frame) = pending.pop_front() {
        if let Err(e) = sink.send(frame.clone()).await {
            warn!("Relay write failed: {}", e);
            pending.push_front(frame);
            return true;
        }
    }

    loop {
        tokio::select! {
            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return false;
                };
                if let Err(e) = sink.send(frame.clone()).await {
                    warn!("Relay write failed: {}", e);
                    pending.push_back(frame);
                    return true;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<SignalingMessage>(&text) {
                    Ok(message) => {
                        let _ = incoming.send(message);
                    }
                    Err(e) => debug!("Ignoring malformed relay frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Relay read failed: {}", e);
                    return true;
                }
            }
        }
    }
}

/// Re-dial with exponential backoff, queueing frames published meanwhile.
/// `None` once the link is dropped.
async fn reconnect(
    url: &str,
    outgoing: &mut mpsc::UnboundedReceiver<Message>,
    pending: &mut VecDeque<Message>,
) -> Option<RelaySocket> {
    let mut delay = RECONNECT_INITIAL;
    loop {
        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => break,
                frame = outgoing.recv() => pending.push_back(frame?),
            }
        }

        match tokio_tungstenite::connect_async(url).await {
            Ok((socket, _)) => {
                info!("Reconnected to relay at {}", url);
                return Some(socket);
            }
            Err(e) => {
                debug!("Relay reconnect to {} failed: {}", url, e);
                delay = (delay * 2).min(RECONNECT_MAX);
            }
        }
    }
}

#[async_trait]
impl SignalingTransport for WsRelayTransport {
    async fn publish(
        &self,
        conversation: &ConversationId,
        message: &SignalingMessage,
    ) -> Result<(), TransportError> {
        let json =
            serde_json::to_string(message).map_err(|e| TransportError::Encode(e.to_string()))?;
        let link = self.link(conversation).await?;
        link.outgoing
            .send(Message::Text(json))
            .map_err(|_| TransportError::Closed)
    }

    async fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> Result<SignalingStream, TransportError> {
        let link = self.link(conversation).await?;
        Ok(broadcast_stream(link.incoming.subscribe(), conversation.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::{CallId, ParticipantId};

    #[test]
    fn test_url_for_conversation() {
        let transport = WsRelayTransport::new("ws://relay.local:8090/", 16);
        assert_eq!(
            transport.url_for(&ConversationId::from("conv-9")),
            "ws://relay.local:8090/relay/conv-9"
        );
    }

    #[test]
    fn test_from_config_uses_relay_url() {
        let config = RelayConfig {
            url: "ws://relay.example:9000".to_string(),
            ..RelayConfig::default()
        };
        let transport = WsRelayTransport::from_config(&config);
        assert_eq!(
            transport.url_for(&ConversationId::from("c")),
            "ws://relay.example:9000/relay/c"
        );
        assert_eq!(transport.capacity, config.channel_capacity);
    }

    /// Relay that hangs up on the first client and echoes for every later one
    async fn relay_dropping_first_link() -> (String, mpsc::UnboundedReceiver<usize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted_tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut count = 0;
            while let Ok((tcp, _)) = listener.accept().await {
                count += 1;
                let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
                let _ = accepted_tx.send(count);
                if count == 1 {
                    let _ = socket.close(None).await;
                    continue;
                }
                tokio::spawn(async move {
                    while let Some(Ok(frame)) = socket.next().await {
                        if frame.is_text() && socket.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (format!("ws://{}", addr), accepted)
    }

    #[tokio::test]
    async fn test_subscribers_survive_relay_reconnect() {
        let (url, mut accepted) = relay_dropping_first_link().await;
        let transport = WsRelayTransport::new(url, 16);
        let conversation = ConversationId::from("conv-1");

        let mut stream = transport.subscribe(&conversation).await.unwrap();
        assert_eq!(accepted.recv().await, Some(1));

        // The relay hung up; the link re-dials without anyone subscribing again
        let redialed = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
            .await
            .unwrap();
        assert_eq!(redialed, Some(2));

        let message = SignalingMessage::end(
            CallId::new(),
            ParticipantId::from("alice"),
            ParticipantId::from("bob"),
        );
        transport.publish(&conversation, &message).await.unwrap();

        let echoed = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert_eq!(echoed, Some(message));
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_connect_error() {
        let transport = WsRelayTransport::new("ws://127.0.0.1:1", 16);
        let result = transport.subscribe(&ConversationId::from("conv-1")).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
