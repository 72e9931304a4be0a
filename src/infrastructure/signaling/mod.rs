//! Signaling infrastructure - channel plus relay transports

pub mod channel;
pub mod memory;
pub mod websocket;

pub use channel::SignalingChannel;
pub use memory::InMemoryRelay;
pub use websocket::WsRelayTransport;

use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::{SignalingMessage, SignalingStream};
use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Adapt a broadcast receiver into a signaling stream
///
/// Lagged receivers skip what they missed; the stream ends when every sender
/// is gone.
pub(crate) fn broadcast_stream(
    rx: broadcast::Receiver<SignalingMessage>,
    conversation: ConversationId,
) -> SignalingStream {
    futures::stream::unfold((rx, conversation), |(mut rx, conversation)| async move {
        loop {
            match rx.recv().await {
                Ok(message) => return Some((message, (rx, conversation))),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscriber on conversation {} lagged, skipped {} message(s)",
                        conversation, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
