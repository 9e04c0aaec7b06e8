//! Channel trait and shared plumbing for chat transports.
//!
//! A channel turns platform updates into [`InboundMessage`](crate::events::InboundMessage)s
//! on the bus and delivers the [`OutboundMessage`]s routed to its name. The
//! outbound side is the same for every platform, so [`spawn_delivery`] drains
//! the bus subscription and hands each message to [`Channel::deliver`] in order.

use crate::bus::MessageBus;
use crate::error::ChannelResult;
use crate::events::OutboundMessage;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Channel is not started.
    #[default]
    Stopped,
    /// Channel is starting up.
    Starting,
    /// Channel is running and connected.
    Running,
    /// Channel is stopping.
    Stopping,
    /// Channel encountered an error.
    Error,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        })
    }
}

/// Channel status information.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    /// Channel name.
    pub name: String,
    /// Current state.
    pub state: ChannelState,
    /// Number of events received from users.
    pub messages_received: u64,
    /// Number of messages delivered to users.
    pub messages_sent: u64,
    /// Last error message, if any.
    pub last_error: Option<String>,
    /// Whether the channel is healthy.
    pub healthy: bool,
}

/// A chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name; also the `channel` part of conversation ids.
    fn name(&self) -> &str;

    /// Connect, subscribe to the bus for outbound messages and start
    /// publishing inbound events.
    async fn start(self: Arc<Self>, bus: &MessageBus) -> ChannelResult<()>;

    /// Stop the channel and release its resources.
    async fn stop(&self) -> ChannelResult<()>;

    /// Deliver one outbound message to the platform.
    async fn deliver(&self, msg: &OutboundMessage) -> ChannelResult<()>;

    /// Current channel status.
    async fn status(&self) -> ChannelStatus;

    /// Check if the channel is currently running.
    async fn is_running(&self) -> bool {
        self.status().await.state == ChannelState::Running
    }
}

/// Drain `rx` into `channel.deliver` until the bus side closes.
///
/// Delivery failures are recorded and logged; they never stop the loop.
pub fn spawn_delivery<C>(
    channel: Arc<C>,
    base: Arc<ChannelBase>,
    mut rx: mpsc::Receiver<OutboundMessage>,
) -> JoinHandle<()>
where
    C: Channel + ?Sized + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match channel.deliver(&msg).await {
                Ok(()) => base.record_sent().await,
                Err(e) => {
                    base.record_error(format!("delivery to {} failed: {e}", msg.conversation))
                        .await;
                }
            }
        }
        debug!(channel = %channel.name(), "outbound queue closed");
    })
}

/// Manager for multiple channels.
///
/// Handles the lifecycle of every registered channel against one bus.
pub struct ChannelManager {
    channels: RwLock<Vec<Arc<dyn Channel>>>,
    bus: MessageBus,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl ChannelManager {
    /// Create a new channel manager with the given message bus.
    #[must_use]
    pub fn new(bus: MessageBus) -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
            bus,
        }
    }

    /// Register a channel.
    pub async fn register(&self, channel: Arc<dyn Channel>) {
        info!(channel = %channel.name(), "channel registered");
        self.channels.write().await.push(channel);
    }

    /// Start all registered channels.
    pub async fn start_all(&self) -> Vec<ChannelResult<()>> {
        let channels = self.channels.read().await;
        let mut results = Vec::with_capacity(channels.len());

        for channel in channels.iter() {
            info!(channel = %channel.name(), "starting channel");
            let result = Arc::clone(channel).start(&self.bus).await;
            if let Err(ref e) = result {
                error!(channel = %channel.name(), error = %e, "failed to start channel");
            }
            results.push(result);
        }

        results
    }

    /// Stop all registered channels.
    pub async fn stop_all(&self) -> Vec<ChannelResult<()>> {
        let channels = self.channels.read().await;
        let mut results = Vec::with_capacity(channels.len());

        for channel in channels.iter() {
            info!(channel = %channel.name(), "stopping channel");
            let result = channel.stop().await;
            if let Err(ref e) = result {
                warn!(channel = %channel.name(), error = %e, "failed to stop channel");
            }
            results.push(result);
        }

        results
    }

    /// Get status of all channels.
    pub async fn status_all(&self) -> Vec<ChannelStatus> {
        let channels = self.channels.read().await;
        let mut statuses = Vec::with_capacity(channels.len());

        for channel in channels.iter() {
            statuses.push(channel.status().await);
        }

        statuses
    }

    /// Get a reference to the message bus.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Get the number of registered channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

/// State and counters every channel keeps.
pub struct ChannelBase {
    name: String,
    state: RwLock<ChannelState>,
    stats: RwLock<ChannelStats>,
}

impl fmt::Debug for ChannelBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBase")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct ChannelStats {
    messages_received: u64,
    messages_sent: u64,
    last_error: Option<String>,
}

impl ChannelBase {
    /// Create a new channel base.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(ChannelState::default()),
            stats: RwLock::new(ChannelStats::default()),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state.
    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Set the channel state.
    pub async fn set_state(&self, state: ChannelState) {
        *self.state.write().await = state;
        debug!(channel = %self.name, %state, "channel state changed");
    }

    /// Record a received event.
    pub async fn record_received(&self) {
        self.stats.write().await.messages_received += 1;
    }

    /// Record a delivered message.
    pub async fn record_sent(&self) {
        self.stats.write().await.messages_sent += 1;
    }

    /// Record an error.
    pub async fn record_error(&self, error: impl Into<String>) {
        let error = error.into();
        warn!(channel = %self.name, %error, "channel error");
        self.stats.write().await.last_error = Some(error);
    }

    /// Build status from current state and stats.
    pub async fn build_status(&self) -> ChannelStatus {
        let state = *self.state.read().await;
        let stats = self.stats.read().await;

        ChannelStatus {
            name: self.name.clone(),
            state,
            messages_received: stats.messages_received,
            messages_sent: stats.messages_sent,
            last_error: stats.last_error.clone(),
            healthy: state == ChannelState::Running && stats.last_error.is_none(),
        }
    }
}

/// Who may talk to the bot.
///
/// Entries are user ids or usernames; a leading `@` is ignored. An empty list
/// allows everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowlistConfig {
    /// Allowed sender ids or usernames.
    pub allowed_senders: Vec<String>,
    /// Allowed chat ids. Empty means allow all.
    pub allowed_chats: Vec<String>,
}

impl AllowlistConfig {
    /// Create a new allowlist config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured sender entries.
    #[must_use]
    pub fn from_senders(entries: &[String]) -> Self {
        entries
            .iter()
            .fold(Self::new(), |config, entry| config.allow_sender(entry.as_str()))
    }

    /// Add an allowed sender.
    #[must_use]
    pub fn allow_sender(mut self, sender: impl Into<String>) -> Self {
        let sender: String = sender.into();
        self.allowed_senders
            .push(sender.trim_start_matches('@').to_string());
        self
    }

    /// Add an allowed chat.
    #[must_use]
    pub fn allow_chat(mut self, chat: impl Into<String>) -> Self {
        self.allowed_chats.push(chat.into());
        self
    }

    /// Check if a sender, known by id and optionally username, is allowed.
    #[must_use]
    pub fn is_sender_allowed(&self, id: &str, username: Option<&str>) -> bool {
        self.allowed_senders.is_empty()
            || self
                .allowed_senders
                .iter()
                .any(|s| s == id || username.is_some_and(|u| s.eq_ignore_ascii_case(u)))
    }

    /// Check if a chat is allowed.
    #[must_use]
    pub fn is_chat_allowed(&self, chat: &str) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.iter().any(|c| c == chat)
    }

    /// Check if a message from the given sender in the given chat is allowed.
    #[must_use]
    pub fn is_allowed(&self, id: &str, username: Option<&str>, chat: &str) -> bool {
        self.is_sender_allowed(id, username) && self.is_chat_allowed(chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConversationId;
    use std::sync::Mutex;

    #[test]
    fn test_allowlist_empty() {
        let config = AllowlistConfig::new();
        assert!(config.is_allowed("anyone", None, "anywhere"));
    }

    #[test]
    fn test_allowlist_sender() {
        let config = AllowlistConfig::from_senders(&["42".to_string(), "@Alice".to_string()]);

        assert!(config.is_sender_allowed("42", None));
        assert!(config.is_sender_allowed("7", Some("alice")));
        assert!(!config.is_sender_allowed("7", Some("bob")));
        assert!(!config.is_sender_allowed("7", None));
    }

    #[test]
    fn test_allowlist_chat() {
        let config = AllowlistConfig::new().allow_chat("chat1");

        assert!(config.is_chat_allowed("chat1"));
        assert!(!config.is_chat_allowed("chat2"));
    }

    #[tokio::test]
    async fn test_channel_base() {
        let base = ChannelBase::new("test");
        assert_eq!(base.name(), "test");
        assert_eq!(base.state().await, ChannelState::Stopped);

        base.set_state(ChannelState::Running).await;
        assert_eq!(base.state().await, ChannelState::Running);

        base.record_received().await;
        base.record_sent().await;

        let status = base.build_status().await;
        assert_eq!(status.messages_received, 1);
        assert_eq!(status.messages_sent, 1);
        assert!(status.healthy);

        base.record_error("boom").await;
        assert!(!base.build_status().await.healthy);
    }

    struct Collecting {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Channel for Collecting {
        fn name(&self) -> &str {
            "collect"
        }

        async fn start(self: Arc<Self>, _bus: &MessageBus) -> ChannelResult<()> {
            Ok(())
        }

        async fn stop(&self) -> ChannelResult<()> {
            Ok(())
        }

        async fn deliver(&self, msg: &OutboundMessage) -> ChannelResult<()> {
            self.seen.lock().unwrap().push(msg.id.clone());
            Ok(())
        }

        async fn status(&self) -> ChannelStatus {
            ChannelBase::new("collect").build_status().await
        }
    }

    #[tokio::test]
    async fn test_spawn_delivery_keeps_order() {
        let channel = Arc::new(Collecting {
            seen: Mutex::new(Vec::new()),
        });
        let base = Arc::new(ChannelBase::new("collect"));
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_delivery(Arc::clone(&channel), Arc::clone(&base), rx);

        let conv = ConversationId::new("collect", "1");
        let mut ids = Vec::new();
        for i in 0..5 {
            let msg = OutboundMessage::text(conv.clone(), format!("m{i}"), None);
            ids.push(msg.id.clone());
            tx.send(msg).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*channel.seen.lock().unwrap(), ids);
        assert_eq!(base.build_status().await.messages_sent, 5);
    }
}
