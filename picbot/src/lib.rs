//! Picbot - a conversational image assistant.
//!
//! Users search the web for pictures, or send a photo and then ask for a
//! description, ask questions about it, or look for similar images. Each
//! conversation is driven by a small state machine; slow external calls run
//! under an orchestrator that keeps the user informed while they work.
//!
//! # Architecture
//!
//! - **Message Bus** ([`bus`]) - async queues between channels and the dialog
//! - **Channels** ([`channels`]) - Telegram and CLI transports
//! - **Session** ([`session`]) - per-conversation state with atomic updates
//! - **Dialog** ([`dialog`]) - event classification, routing and transitions
//! - **Orchestrator** ([`orchestrator`]) - liveness, resource release, outcomes
//! - **Services** ([`services`]) - search, captioning, translation, similarity
//! - **Gateway** ([`gateway`]) - wires everything and dispatches events
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use picbot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = load_config().await?;
//!     let gateway = Gateway::new(GatewayConfig::new(config)).await?;
//!     gateway.run().await
//! }
//! ```
//!
//! # Features
//!
//! - `telegram` - Enable Telegram bot support via teloxide (default)

pub mod bus;
pub mod channel;
pub mod channels;
pub mod config;
pub mod dialog;
pub mod error;
pub mod events;
pub mod gateway;
pub mod orchestrator;
pub mod services;
pub mod session;
pub mod transport;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    // Error types (centralized)
    pub use crate::error::{
        BotError, BusError, BusResult, ChannelError, ChannelResult, ConfigError, ConfigResult,
        FlowError, FlowResult, ProviderError, ProviderResult, Result, StorageError,
        StorageResult,
    };

    // Bus
    pub use crate::bus::{InboundHandle, MessageBus};

    // Channel
    pub use crate::channel::{
        AllowlistConfig, Channel, ChannelBase, ChannelManager, ChannelState, ChannelStatus,
    };
    pub use crate::channels::{CliChannel, CliChannelConfig};
    #[cfg(feature = "telegram")]
    pub use crate::channels::{TelegramChannel, TelegramChannelConfig};

    // Config
    pub use crate::config::{
        BotConfig, ConfigIssue, IssueLevel, SessionBackend, TelegramConfig, config_path,
        init_config, load_config, load_config_from, save_config,
    };

    // Dialog
    pub use crate::dialog::{Dialog, DialogSettings, DialogState, Effect, Event, Step};

    // Events
    pub use crate::events::{
        ConversationId, ImagePayload, ImageRef, InboundContent, InboundMessage, KeyButton,
        Keyboard, OutboundContent, OutboundMessage,
    };

    // Gateway
    pub use crate::gateway::{Gateway, GatewayConfig, GatewayStatus};

    // Orchestrator
    pub use crate::orchestrator::{Orchestrator, Outcome};

    // Services
    pub use crate::services::{
        Captioner, ImageFetcher, ImageSearch, Services, SimilarImages, SimilarityFinder,
        Translator,
    };

    // Session
    pub use crate::session::{FileStorage, MemoryStorage, Session, SessionStorage, SessionStore};

    // Transport
    pub use crate::transport::{BusTransport, Transport};
}
