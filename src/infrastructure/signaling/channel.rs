//! Signaling channel for one conversation

use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::{SignalingMessage, SignalingStream, SignalingTransport, TransportError};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Typed, fire-and-forget view of the relay scoped to one conversation
#[derive(Clone)]
pub struct SignalingChannel {
    conversation: ConversationId,
    transport: Arc<dyn SignalingTransport>,
}

impl SignalingChannel {
    pub fn new(conversation: ConversationId, transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            conversation,
            transport,
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Publish a message; failures are logged, never returned
    pub async fn send(&self, message: SignalingMessage) {
        match self.transport.publish(&self.conversation, &message).await {
            Ok(()) => {
                debug!(
                    "Sent {} for call {} to {}",
                    message.type_name(),
                    message.call_id,
                    message.to_user_id
                );
                metrics::counter!("peercall_signaling_sent_total", "type" => message.type_name())
                    .increment(1);
            }
            Err(e) => {
                warn!(
                    "Failed to send {} for call {}: {}",
                    message.type_name(),
                    message.call_id,
                    e
                );
                metrics::counter!("peercall_signaling_send_failures_total").increment(1);
            }
        }
    }

    /// Every message broadcast on the conversation, own messages included
    pub async fn subscribe(&self) -> Result<SignalingStream, TransportError> {
        self.transport.subscribe(&self.conversation).await
    }

    /// Run `handler` for each message, in arrival order, on a background task
    pub async fn on_message<F, Fut>(&self, mut handler: F) -> Result<JoinHandle<()>, TransportError>
    where
        F: FnMut(SignalingMessage) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut stream = self.subscribe().await?;
        let conversation = self.conversation.clone();

        Ok(tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                handler(message).await;
            }
            info!("Signaling stream for conversation {} ended", conversation);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::{CallId, ParticipantId};
    use crate::domain::signaling::MockSignalingTransport;
    use futures::stream;
    use tokio::sync::mpsc;

    fn end_message() -> SignalingMessage {
        SignalingMessage::end(
            CallId::new(),
            ParticipantId::from("alice"),
            ParticipantId::from("bob"),
        )
    }

    #[tokio::test]
    async fn test_send_swallows_transport_failure() {
        let mut transport = MockSignalingTransport::new();
        transport
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(TransportError::Closed));

        let channel = SignalingChannel::new(ConversationId::from("conv-1"), Arc::new(transport));
        channel.send(end_message()).await;
    }

    #[tokio::test]
    async fn test_send_uses_channel_conversation() {
        let mut transport = MockSignalingTransport::new();
        transport
            .expect_publish()
            .withf(|conversation, message| {
                conversation.as_str() == "conv-7" && message.type_name() == "end"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let channel = SignalingChannel::new(ConversationId::from("conv-7"), Arc::new(transport));
        channel.send(end_message()).await;
    }

    #[tokio::test]
    async fn test_on_message_delivers_in_order() {
        let first = end_message();
        let second = end_message();
        let batch = vec![first.clone(), second.clone()];

        let mut transport = MockSignalingTransport::new();
        transport
            .expect_subscribe()
            .times(1)
            .returning(move |_| Ok(stream::iter(batch.clone()).boxed()));

        let channel = SignalingChannel::new(ConversationId::from("conv-1"), Arc::new(transport));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = channel
            .on_message(move |message| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(message);
                }
            })
            .await
            .unwrap();

        task.await.unwrap();
        assert_eq!(rx.recv().await, Some(first));
        assert_eq!(rx.recv().await, Some(second));
    }

    #[tokio::test]
    async fn test_on_message_propagates_subscribe_failure() {
        let mut transport = MockSignalingTransport::new();
        transport
            .expect_subscribe()
            .returning(|_| Err(TransportError::Connect("refused".to_string())));

        let channel = SignalingChannel::new(ConversationId::from("conv-1"), Arc::new(transport));
        let result = channel.on_message(|_| async {}).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
