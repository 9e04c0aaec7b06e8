//! Gateway service for running the complete bot.
//!
//! The gateway wires everything together:
//! - Message bus
//! - Channel manager (Telegram, CLI)
//! - Session store and collaborator services
//! - The dialog, fed one task per inbound event

use crate::bus::MessageBus;
use crate::channel::ChannelManager;
use crate::channels::{CliChannel, CliChannelConfig};
use crate::config::{BotConfig, SessionBackend};
use crate::dialog::{Dialog, DialogSettings};
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::services::{ImageFetcher, Services};
use crate::session::{FileStorage, MemoryStorage, SessionStore};
use crate::transport::{BusTransport, Transport};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[cfg(feature = "telegram")]
use crate::channels::{TelegramChannel, TelegramChannelConfig};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bot configuration.
    pub bot_config: BotConfig,
    /// Whether to enable the CLI channel.
    pub enable_cli: bool,
    /// CLI channel settings.
    pub cli: CliChannelConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bot_config: BotConfig::default(),
            enable_cli: false,
            cli: CliChannelConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a gateway configuration from a bot configuration.
    #[must_use]
    pub fn new(bot_config: BotConfig) -> Self {
        Self {
            bot_config,
            ..Self::default()
        }
    }

    /// Enable or disable the CLI channel.
    #[must_use]
    pub const fn enable_cli(mut self, enable: bool) -> Self {
        self.enable_cli = enable;
        self
    }

    /// Set the CLI channel settings.
    #[must_use]
    pub fn cli(mut self, cli: CliChannelConfig) -> Self {
        self.cli = cli;
        self
    }
}

/// Gateway service that runs the complete bot.
pub struct Gateway {
    config: GatewayConfig,
    bus: MessageBus,
    channel_manager: ChannelManager,
    dialog: Dialog,
    running: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("dialog", &self.dialog)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Build the gateway: register channels, then create the session store,
    /// services and dialog on top of them.
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        let bus = MessageBus::new();
        let channel_manager = ChannelManager::new(bus.clone());
        let remote = Self::setup_channels(&config, &channel_manager).await;

        let bot = &config.bot_config;
        let services = Services::from_config(bot, remote)?;
        let settings = DialogSettings {
            max_results: services.search.max_results(),
            slow_threshold: bot.dialog.slow_threshold,
            count_buttons: bot.dialog.count_buttons.clone(),
            captions: bot.caption.captions,
        };

        let transport: Arc<dyn Transport> = Arc::new(BusTransport::new(bus.clone()));
        let orchestrator = Orchestrator::new(Arc::clone(&transport))
            .with_interval(Duration::from_secs(bot.dialog.liveness_interval_secs));
        let dialog = Dialog::new(Self::session_store(bot), transport, services, settings)
            .with_orchestrator(orchestrator);

        Ok(Self {
            config,
            bus,
            channel_manager,
            dialog,
            running: Arc::new(RwLock::new(false)),
        })
    }

    fn session_store(config: &BotConfig) -> SessionStore {
        match config.sessions.backend {
            SessionBackend::Memory => SessionStore::new(MemoryStorage::new()),
            SessionBackend::File => {
                let storage = config
                    .sessions
                    .path
                    .as_ref()
                    .map_or_else(FileStorage::default_path, FileStorage::new);
                info!(path = %storage.base_path().display(), "file session storage");
                SessionStore::new(storage)
            }
        }
    }

    /// Register channels based on configuration. Returns the fetcher for
    /// platform-hosted photos, if a platform channel provides one.
    async fn setup_channels(
        config: &GatewayConfig,
        manager: &ChannelManager,
    ) -> Option<Arc<dyn ImageFetcher>> {
        if config.enable_cli {
            manager
                .register(Arc::new(CliChannel::with_config(config.cli.clone())))
                .await;
            info!("CLI channel enabled");
        }

        #[cfg(feature = "telegram")]
        {
            let telegram = &config.bot_config.telegram;
            if telegram.enabled {
                if telegram.token.is_empty() {
                    error!("Telegram enabled but no token configured");
                } else {
                    let channel =
                        TelegramChannel::new(TelegramChannelConfig::from_config(telegram));
                    let fetcher = channel.fetcher();
                    manager.register(Arc::new(channel)).await;
                    info!("Telegram channel enabled");
                    return Some(fetcher);
                }
            }
        }

        None
    }

    /// Get a reference to the message bus.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Get a reference to the channel manager.
    #[must_use]
    pub const fn channel_manager(&self) -> &ChannelManager {
        &self.channel_manager
    }

    /// Get a reference to the dialog.
    #[must_use]
    pub const fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    /// Run until Ctrl+C.
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Start all channels and dispatch inbound events until `shutdown`
    /// resolves or the bus closes, then stop the channels.
    ///
    /// Every event is handled on its own task, so one slow conversation never
    /// holds up another.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        *self.running.write().await = true;
        info!("Gateway starting...");

        for result in self.channel_manager.start_all().await {
            if let Err(e) = result {
                error!(error = %e, "failed to start channel");
            }
        }
        let channels = self.channel_manager.channel_count().await;
        info!(channels, "Gateway started");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                msg = self.bus.consume_inbound() => {
                    let Some(msg) = msg else {
                        debug!("inbound queue closed");
                        break;
                    };
                    let dialog = self.dialog.clone();
                    tokio::spawn(async move {
                        let conversation = msg.conversation.clone();
                        if let Err(e) = dialog.handle(msg).await {
                            error!(conversation = %conversation, error = %e, "event handling failed");
                        }
                    });
                }
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        info!("Gateway stopping...");
        self.channel_manager.stop_all().await;
        *self.running.write().await = false;
        info!("Gateway stopped");
        Ok(())
    }

    /// Check if the gateway is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Get channel statuses and bus counters.
    pub async fn status(&self) -> GatewayStatus {
        let channel_statuses = self.channel_manager.status_all().await;
        let bus_stats = self.bus.stats().await;

        GatewayStatus {
            running: *self.running.read().await,
            channels: channel_statuses
                .into_iter()
                .map(|s| ChannelStatusInfo {
                    name: s.name,
                    state: s.state.to_string(),
                    messages_received: s.messages_received,
                    messages_sent: s.messages_sent,
                    healthy: s.healthy,
                })
                .collect(),
            total_inbound: bus_stats.inbound_count,
            total_outbound: bus_stats.outbound_count,
            dropped_outbound: bus_stats.dropped_count,
        }
    }
}

/// Gateway status information.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    /// Whether the gateway is running.
    pub running: bool,
    /// Channel statuses.
    pub channels: Vec<ChannelStatusInfo>,
    /// Total inbound events received.
    pub total_inbound: u64,
    /// Total outbound messages routed to a channel.
    pub total_outbound: u64,
    /// Outbound messages nobody was subscribed for.
    pub dropped_outbound: u64,
}

/// Channel status info for gateway status.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatusInfo {
    /// Channel name.
    pub name: String,
    /// Channel state.
    pub state: String,
    /// Events received.
    pub messages_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Whether the channel is healthy.
    pub healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::CLI_CHANNEL;
    use crate::events::{ConversationId, InboundMessage};
    use tokio::sync::oneshot;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(!config.enable_cli);
        assert_eq!(config.bot_config.sessions.backend, SessionBackend::Memory);
    }

    #[tokio::test]
    async fn test_cli_gateway_round_trip() {
        let gateway = Arc::new(
            Gateway::new(GatewayConfig::default().enable_cli(true))
                .await
                .unwrap(),
        );
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let runner = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                gateway
                    .run_until(async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        let conv = ConversationId::new(CLI_CHANNEL, "local");
        tokio::time::sleep(Duration::from_millis(50)).await;
        gateway
            .bus()
            .publish_inbound(InboundMessage::text(conv.clone(), "red tractor"))
            .await
            .unwrap();

        let mut waited = 0;
        while gateway.status().await.total_outbound == 0 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }

        let status = gateway.status().await;
        assert!(status.running);
        assert_eq!(status.channels.len(), 1);
        assert!(status.total_outbound >= 1);

        let session = gateway.dialog().store().get(&conv).await;
        assert_eq!(session.state().as_str(), "awaiting_result_count");

        stop_tx.send(()).unwrap();
        runner.await.unwrap().unwrap();
        assert!(!gateway.is_running().await);
    }
}
