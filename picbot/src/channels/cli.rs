//! Command-line channel.
//!
//! Lines typed on stdin become inbound events for a single local
//! conversation; outbound messages are rendered as plain text on stdout.
//!
//! Besides free text, two commands stand in for what a chat client would
//! offer:
//!
//! - `/photo <path>` submits a local image file as a photo.
//! - `/press <value>` presses a keyboard button by its value.

use crate::bus::MessageBus;
use crate::channel::{Channel, ChannelBase, ChannelState, ChannelStatus, spawn_delivery};
use crate::error::{ChannelError, ChannelResult};
use crate::events::{
    ButtonAction, ConversationId, ImageRef, InboundMessage, OutboundContent, OutboundMessage,
};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Channel name used for CLI conversations.
pub const CLI_CHANNEL: &str = "cli";

/// CLI channel configuration.
#[derive(Debug, Clone)]
pub struct CliChannelConfig {
    /// Prompt string to display before user input.
    pub prompt: String,
    /// Chat identifier of the local conversation.
    pub chat_id: String,
}

impl Default for CliChannelConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            chat_id: "local".to_string(),
        }
    }
}

impl CliChannelConfig {
    /// Create a new CLI channel config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prompt string.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the chat identifier.
    #[must_use]
    pub fn chat_id(mut self, id: impl Into<String>) -> Self {
        self.chat_id = id.into();
        self
    }

    /// The conversation this CLI session talks in.
    #[must_use]
    pub fn conversation(&self) -> ConversationId {
        ConversationId::new(CLI_CHANNEL, &self.chat_id)
    }
}

/// Command-line interface channel.
///
/// Delivers outbound messages for the `cli` channel to stdout. Input is read
/// separately by [`run_interactive`].
#[derive(Debug)]
pub struct CliChannel {
    base: Arc<ChannelBase>,
    config: CliChannelConfig,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl CliChannel {
    /// Create a new CLI channel with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CliChannelConfig::default())
    }

    /// Create a new CLI channel with the given configuration.
    #[must_use]
    pub fn with_config(config: CliChannelConfig) -> Self {
        Self {
            base: Arc::new(ChannelBase::new(CLI_CHANNEL)),
            config,
            delivery: Mutex::new(None),
        }
    }

    /// Render an outbound message as terminal text.
    ///
    /// Liveness signals have no textual form and render to `None`.
    #[must_use]
    pub fn render(msg: &OutboundMessage) -> Option<String> {
        match &msg.content {
            OutboundContent::Text { text, keyboard, .. } => {
                let mut out = text.clone();
                if let Some(keyboard) = keyboard {
                    for row in &keyboard.rows {
                        let cells: Vec<String> = row
                            .iter()
                            .map(|button| match &button.action {
                                ButtonAction::Callback(value) => {
                                    format!("[{}: /press {value}]", button.label)
                                }
                                ButtonAction::Url(url) => format!("[{}: {url}]", button.label),
                            })
                            .collect();
                        out.push('\n');
                        out.push_str(&cells.join(" "));
                    }
                }
                Some(out)
            }
            OutboundContent::Image(image) => Some(format!(
                "[image {} ({}, {} bytes)]",
                image.filename,
                image.mime,
                image.data.len()
            )),
            OutboundContent::Liveness => None,
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(self: Arc<Self>, bus: &MessageBus) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Starting).await;

        let outbound_rx = bus.subscribe_channel(CLI_CHANNEL).await;
        let handle = spawn_delivery(Arc::clone(&self), Arc::clone(&self.base), outbound_rx);
        *self.delivery.lock().await = Some(handle);

        self.base.set_state(ChannelState::Running).await;
        info!(chat_id = %self.config.chat_id, "CLI channel started");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping).await;
        if let Some(handle) = self.delivery.lock().await.take() {
            handle.abort();
        }
        self.base.set_state(ChannelState::Stopped).await;
        info!("CLI channel stopped");
        Ok(())
    }

    #[allow(clippy::print_stdout)] // CLI channel intentionally prints to stdout
    async fn deliver(&self, msg: &OutboundMessage) -> ChannelResult<()> {
        if let Some(text) = Self::render(msg) {
            println!("\n{text}\n");
            print!("{}", self.config.prompt);
            let _ = std::io::stdout().flush();
        }
        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.build_status().await
    }
}

/// Turn one input line into an inbound event. Blank lines yield `None`.
#[must_use]
pub fn parse_line(conversation: &ConversationId, line: &str) -> Option<InboundMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let msg = if let Some(path) = trimmed.strip_prefix("/photo ") {
        InboundMessage::photo(
            conversation.clone(),
            ImageRef::Local {
                path: PathBuf::from(path.trim()),
            },
        )
    } else if let Some(value) = trimmed.strip_prefix("/press ") {
        InboundMessage::button(conversation.clone(), value.trim())
    } else {
        InboundMessage::text(conversation.clone(), trimmed)
    };
    Some(msg.with_language(std::env::var("LANG").ok().and_then(|l| language_tag(&l))))
}

/// `en_US.UTF-8` → `en`.
fn language_tag(locale: &str) -> Option<String> {
    let tag: String = locale
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_lowercase();
    (tag.len() == 2 && tag != "c").then_some(tag)
}

/// Run an interactive CLI session until stdin closes or the user quits.
///
/// Output is handled by a started [`CliChannel`]; this only reads input.
#[allow(clippy::print_stdout)] // CLI intentionally prints to stdout
pub async fn run_interactive(bus: &MessageBus, config: CliChannelConfig) -> ChannelResult<()> {
    let conversation = config.conversation();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("{}", config.prompt);
    let _ = std::io::stdout().flush();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ChannelError::Internal(e.to_string()))?
    {
        let trimmed = line.trim();
        if matches!(trimmed, "exit" | "quit" | "/quit") {
            break;
        }

        match parse_line(&conversation, trimmed) {
            Some(msg) => bus.publish_inbound(msg).await?,
            None => {
                print!("{}", config.prompt);
                let _ = std::io::stdout().flush();
            }
        }
    }

    debug!("CLI input closed");
    Ok(())
}
