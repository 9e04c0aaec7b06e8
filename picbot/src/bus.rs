//! Async message bus decoupling channels from the dialog.
//!
//! Channels publish normalized inbound events onto a single queue consumed by
//! the gateway; the dialog publishes outbound messages which are routed to the
//! subscriber registered for the target channel. Each channel gets one ordered
//! queue, so messages to a chat are delivered in the order they were produced.

use crate::error::{BusError, BusResult};
use crate::events::{InboundMessage, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, trace};

/// Default capacity for message queues.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Async message bus between channels and the dialog.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<MessageBusInner>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").finish_non_exhaustive()
    }
}

struct MessageBusInner {
    /// Inbound message queue (channels → dialog).
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,

    /// Per-channel outbound queues (dialog → channels).
    channel_subscribers: RwLock<HashMap<String, mpsc::Sender<OutboundMessage>>>,

    capacity: usize,
    stats: RwLock<BusStats>,
}

/// Message bus statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusStats {
    /// Total inbound messages published.
    pub inbound_count: u64,
    /// Total outbound messages delivered to a channel queue.
    pub outbound_count: u64,
    /// Outbound messages with no live subscriber.
    pub dropped_count: u64,
}

impl MessageBus {
    /// Create a new message bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a new message bus with specified queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(MessageBusInner {
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                channel_subscribers: RwLock::new(HashMap::new()),
                capacity,
                stats: RwLock::new(BusStats::default()),
            }),
        }
    }

    /// Publish an inbound message from a channel.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> BusResult<()> {
        trace!(conversation = %msg.conversation, "publishing inbound message");

        self.inner
            .inbound_tx
            .send(msg)
            .await
            .map_err(|_| BusError::InboundClosed)?;

        self.inner.stats.write().await.inbound_count += 1;
        Ok(())
    }

    /// Consume the next inbound message. Returns `None` once every sender is gone.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inner.inbound_rx.lock().await.recv().await
    }

    /// Consume the next inbound message, giving up after `timeout`.
    pub async fn consume_inbound_timeout(&self, timeout: Duration) -> Option<InboundMessage> {
        let mut rx = self.inner.inbound_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Route an outbound message to its channel's queue.
    ///
    /// A message for a channel nobody subscribed to is counted as dropped and
    /// reported as [`BusError::ChannelNotFound`].
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> BusResult<()> {
        trace!(conversation = %msg.conversation, "publishing outbound message");

        let sender = self
            .inner
            .channel_subscribers
            .read()
            .await
            .get(msg.channel())
            .cloned();

        let channel = msg.channel().to_string();
        let delivered = match sender {
            Some(tx) => tx.send(msg).await.is_ok(),
            None => false,
        };

        let mut stats = self.inner.stats.write().await;
        if delivered {
            stats.outbound_count += 1;
            Ok(())
        } else {
            stats.dropped_count += 1;
            debug!(channel = %channel, "no subscriber for outbound message");
            Err(BusError::ChannelNotFound(channel))
        }
    }

    /// Subscribe to outbound messages for a channel.
    ///
    /// A later subscription for the same channel replaces the earlier one.
    pub async fn subscribe_channel(&self, channel: &str) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner
            .channel_subscribers
            .write()
            .await
            .insert(channel.to_string(), tx);

        debug!(channel = %channel, "channel subscriber registered");
        rx
    }

    /// Get current bus statistics.
    pub async fn stats(&self) -> BusStats {
        *self.inner.stats.read().await
    }

    /// Lightweight handle for publishing inbound messages.
    #[must_use]
    pub fn inbound_handle(&self) -> InboundHandle {
        InboundHandle {
            tx: self.inner.inbound_tx.clone(),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight handle for publishing inbound messages.
#[derive(Debug, Clone)]
pub struct InboundHandle {
    tx: mpsc::Sender<InboundMessage>,
}

impl InboundHandle {
    /// Publish an inbound message.
    pub async fn publish(&self, msg: InboundMessage) -> BusResult<()> {
        self.tx.send(msg).await.map_err(|_| BusError::InboundClosed)
    }
}
