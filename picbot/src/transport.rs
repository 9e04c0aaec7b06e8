//! Outbound side of the chat transport as seen by the dialog.

use crate::bus::MessageBus;
use crate::error::ChannelResult;
use crate::events::{
    ConversationId, ImagePayload, Keyboard, MessageFormat, OutboundContent, OutboundMessage,
};
use async_trait::async_trait;

/// Delivers messages to a conversation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message with an optional keyboard.
    async fn send_text(
        &self,
        conversation: &ConversationId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> ChannelResult<()>;

    /// Send an image. Ownership of the payload passes to the transport.
    async fn send_image(
        &self,
        conversation: &ConversationId,
        image: ImagePayload,
    ) -> ChannelResult<()>;

    /// Send a lightweight "still working" signal.
    async fn send_liveness(&self, conversation: &ConversationId) -> ChannelResult<()>;
}

/// [`Transport`] that publishes onto the message bus, leaving delivery to the
/// channel subscribed for the conversation's channel name.
#[derive(Debug, Clone)]
pub struct BusTransport {
    bus: MessageBus,
}

impl BusTransport {
    /// Create a transport over the given bus.
    #[must_use]
    pub const fn new(bus: MessageBus) -> Self {
        Self { bus }
    }

    async fn publish(
        &self,
        conversation: &ConversationId,
        content: OutboundContent,
    ) -> ChannelResult<()> {
        self.bus
            .publish_outbound(OutboundMessage::new(conversation.clone(), content))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for BusTransport {
    async fn send_text(
        &self,
        conversation: &ConversationId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> ChannelResult<()> {
        let content = OutboundContent::Text {
            text: text.to_string(),
            keyboard,
            format: MessageFormat::Plain,
        };
        self.publish(conversation, content).await
    }

    async fn send_image(
        &self,
        conversation: &ConversationId,
        image: ImagePayload,
    ) -> ChannelResult<()> {
        self.publish(conversation, OutboundContent::Image(image)).await
    }

    async fn send_liveness(&self, conversation: &ConversationId) -> ChannelResult<()> {
        self.publish(conversation, OutboundContent::Liveness).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_transport_routes_by_channel() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_channel("cli").await;
        let transport = BusTransport::new(bus);
        let conv = ConversationId::new("cli", "local");

        transport.send_text(&conv, "hi", None).await.unwrap();
        transport.send_liveness(&conv).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.content, OutboundContent::Text { .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.content, OutboundContent::Liveness);
    }

    #[tokio::test]
    async fn test_bus_transport_unknown_channel_fails() {
        let transport = BusTransport::new(MessageBus::new());
        let conv = ConversationId::new("nowhere", "1");
        assert!(transport.send_liveness(&conv).await.is_err());
    }
}
