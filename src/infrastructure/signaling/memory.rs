//! In-process relay hub
//!
//! One `tokio::sync::broadcast` channel per conversation. Used by the relay
//! server to fan frames out to websocket clients, and directly by peers that
//! live in the same process.

use super::broadcast_stream;
use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::{SignalingMessage, SignalingStream, SignalingTransport, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Default per-conversation buffer
pub const DEFAULT_CAPACITY: usize = 256;

pub struct InMemoryRelay {
    capacity: usize,
    channels: RwLock<HashMap<ConversationId, broadcast::Sender<SignalingMessage>>>,
}

impl InMemoryRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    async fn sender(&self, conversation: &ConversationId) -> broadcast::Sender<SignalingMessage> {
        if let Some(tx) = self.channels.read().await.get(conversation) {
            return tx.clone();
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(conversation.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscribers on a conversation
    pub async fn subscriber_count(&self, conversation: &ConversationId) -> usize {
        self.channels
            .read()
            .await
            .get(conversation)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop conversations nobody listens to anymore
    pub async fn prune(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    pub async fn conversation_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl SignalingTransport for InMemoryRelay {
    async fn publish(
        &self,
        conversation: &ConversationId,
        message: &SignalingMessage,
    ) -> Result<(), TransportError> {
        let tx = self.sender(conversation).await;
        if tx.send(message.clone()).is_err() {
            debug!(
                "No subscribers on conversation {}, {} dropped",
                conversation,
                message.type_name()
            );
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> Result<SignalingStream, TransportError> {
        let rx = self.sender(conversation).await.subscribe();
        Ok(broadcast_stream(rx, conversation.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::{CallId, ParticipantId};
    use futures::StreamExt;

    fn message(from: &str, to: &str) -> SignalingMessage {
        SignalingMessage::reject(CallId::new(), ParticipantId::from(from), ParticipantId::from(to))
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_including_sender() {
        let relay = InMemoryRelay::default();
        let conversation = ConversationId::from("conv-1");

        let mut alice = relay.subscribe(&conversation).await.unwrap();
        let mut bob = relay.subscribe(&conversation).await.unwrap();

        let sent = message("alice", "bob");
        relay.publish(&conversation, &sent).await.unwrap();

        assert_eq!(alice.next().await, Some(sent.clone()));
        assert_eq!(bob.next().await, Some(sent));
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let relay = InMemoryRelay::default();
        let mut other = relay.subscribe(&ConversationId::from("conv-2")).await.unwrap();

        relay
            .publish(&ConversationId::from("conv-1"), &message("alice", "bob"))
            .await
            .unwrap();
        let marker = message("carol", "dave");
        relay
            .publish(&ConversationId::from("conv-2"), &marker)
            .await
            .unwrap();

        assert_eq!(other.next().await, Some(marker));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let relay = InMemoryRelay::default();
        let result = relay
            .publish(&ConversationId::from("empty"), &message("alice", "bob"))
            .await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let relay = InMemoryRelay::new(2);
        let conversation = ConversationId::from("conv-1");
        let mut slow = relay.subscribe(&conversation).await.unwrap();

        let mut last = message("alice", "bob");
        for _ in 0..5 {
            last = message("alice", "bob");
            relay.publish(&conversation, &last).await.unwrap();
        }

        let mut received = Vec::new();
        while received.len() < 2 {
            received.push(slow.next().await.unwrap());
        }
        assert_eq!(received.last(), Some(&last));
    }

    #[tokio::test]
    async fn test_prune_removes_abandoned_conversations() {
        let relay = InMemoryRelay::default();
        let conversation = ConversationId::from("conv-1");
        let stream = relay.subscribe(&conversation).await.unwrap();
        assert_eq!(relay.subscriber_count(&conversation).await, 1);

        drop(stream);
        assert_eq!(relay.subscriber_count(&conversation).await, 0);
        assert_eq!(relay.prune().await, 1);
        assert_eq!(relay.conversation_count().await, 0);
    }
}
