//! Telegram channel implementation using teloxide.
//!
//! Text messages, photos and inline-keyboard presses are turned into inbound
//! events; replies go out as messages with inline keyboards, photos, or a
//! "typing" chat action while a long operation runs.
//!
//! # Setup
//!
//! 1. Create a bot via [@BotFather](https://t.me/botfather)
//! 2. Put the token in `telegram.token` or `TELEGRAM_BOT_TOKEN`
//! 3. Optionally restrict access with `telegram.allow_from`

use crate::bus::{InboundHandle, MessageBus};
use crate::channel::{
    AllowlistConfig, Channel, ChannelBase, ChannelState, ChannelStatus, spawn_delivery,
};
use crate::config::TelegramConfig;
use crate::error::{ChannelError, ChannelResult, ProviderError, ProviderResult};
use crate::events::{
    ButtonAction, ConversationId, ImageRef, InboundContent, InboundMessage, Keyboard,
    MessageFormat, OutboundContent, OutboundMessage,
};
use crate::services::ImageFetcher;
use crate::services::fetch::ImageBuffer;
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::dispatching::ShutdownToken;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode, User,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Channel name used for Telegram conversations.
pub const TELEGRAM_CHANNEL: &str = "telegram";

/// Telegram's message length limit, in characters.
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram channel configuration.
#[derive(Clone)]
pub struct TelegramChannelConfig {
    /// Bot token from @BotFather.
    pub token: String,
    /// Who may talk to the bot.
    pub allowlist: AllowlistConfig,
    /// Maximum message length before splitting.
    pub max_message_length: usize,
}

impl std::fmt::Debug for TelegramChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannelConfig")
            .field("allowlist", &self.allowlist)
            .field("max_message_length", &self.max_message_length)
            .finish_non_exhaustive()
    }
}

impl TelegramChannelConfig {
    /// Create a new Telegram channel config with the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            allowlist: AllowlistConfig::new(),
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }

    /// Build from the `telegram` config section.
    #[must_use]
    pub fn from_config(config: &TelegramConfig) -> Self {
        Self::new(&config.token).allowlist(AllowlistConfig::from_senders(&config.allow_from))
    }

    /// Replace the allowlist.
    #[must_use]
    pub fn allowlist(mut self, allowlist: AllowlistConfig) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Add an allowed user id or username.
    #[must_use]
    pub fn allow_user(mut self, user: impl Into<String>) -> Self {
        self.allowlist = self.allowlist.allow_sender(user);
        self
    }
}

/// Telegram channel implementation.
pub struct TelegramChannel {
    base: Arc<ChannelBase>,
    config: TelegramChannelConfig,
    bot: Bot,
    shutdown: Mutex<Option<ShutdownToken>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("base", &self.base)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    /// Create a new Telegram channel with the given configuration.
    ///
    /// No network traffic happens until [`Channel::start`].
    #[must_use]
    pub fn new(config: TelegramChannelConfig) -> Self {
        let bot = Bot::new(&config.token);
        Self {
            base: Arc::new(ChannelBase::new(TELEGRAM_CHANNEL)),
            config,
            bot,
            shutdown: Mutex::new(None),
            delivery: Mutex::new(None),
        }
    }

    /// Fetcher that downloads photos users sent to this bot.
    #[must_use]
    pub fn fetcher(&self) -> Arc<dyn ImageFetcher> {
        Arc::new(TelegramFetcher {
            bot: self.bot.clone(),
        })
    }

    /// Split a long message into chunks of at most `max_len` characters,
    /// preferring line boundaries.
    fn split_message(text: &str, max_len: usize) -> Vec<String> {
        if text.chars().count() <= max_len {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for line in text.lines() {
            let line_len = line.chars().count();
            if current_len + line_len + 1 > max_len {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                if line_len > max_len {
                    let chars: Vec<char> = line.chars().collect();
                    for chunk in chars.chunks(max_len) {
                        chunks.push(chunk.iter().collect());
                    }
                    continue;
                }
            }
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(line);
            current_len += line_len;
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

/// Convert a keyboard to Telegram's inline markup. Link buttons with an
/// unparseable URL are dropped.
fn inline_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    let rows = keyboard.rows.iter().map(|row| {
        row.iter()
            .filter_map(|button| match &button.action {
                ButtonAction::Callback(value) => {
                    Some(InlineKeyboardButton::callback(&button.label, value))
                }
                ButtonAction::Url(link) => match url::Url::parse(link) {
                    Ok(parsed) => Some(InlineKeyboardButton::url(&button.label, parsed)),
                    Err(e) => {
                        warn!(url = %link, error = %e, "dropping link button");
                        None
                    }
                },
            })
            .collect::<Vec<_>>()
    });
    InlineKeyboardMarkup::new(rows.filter(|row| !row.is_empty()))
}

/// `/start@picbot_bot foo` → `/start foo`.
fn strip_mention(text: &str) -> String {
    let text = text.trim();
    if !text.starts_with('/') {
        return text.to_string();
    }
    let (command, rest) = text.split_once(' ').unwrap_or((text, ""));
    let command = command.split_once('@').map_or(command, |(c, _)| c);
    if rest.is_empty() {
        command.to_string()
    } else {
        format!("{command} {rest}")
    }
}

/// Classify a Telegram message. Anything but text and photos is ignored.
fn classify_message(msg: &Message) -> Option<InboundContent> {
    if let Some(photos) = msg.photo() {
        let largest = photos
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
        return Some(InboundContent::Photo(ImageRef::Remote {
            file_id: largest.file.id.to_string(),
        }));
    }
    msg.text().map(|text| InboundContent::Text(strip_mention(text)))
}

fn sender_allowed(allowlist: &AllowlistConfig, user: Option<&User>, chat: &str) -> bool {
    let Some(user) = user else {
        return allowlist.allowed_senders.is_empty() && allowlist.is_chat_allowed(chat);
    };
    allowlist.is_allowed(&user.id.to_string(), user.username.as_deref(), chat)
}

async fn publish(
    bus: &InboundHandle,
    base: &ChannelBase,
    chat: &str,
    user: Option<&User>,
    content: InboundContent,
) {
    let sender = user.map_or_else(|| "unknown".to_string(), |u| u.id.to_string());
    let language = user.and_then(|u| u.language_code.clone());
    let inbound = InboundMessage::new(ConversationId::new(TELEGRAM_CHANNEL, chat), sender, content)
        .with_language(language);

    base.record_received().await;
    if let Err(e) = bus.publish(inbound).await {
        error!(error = %e, "failed to publish telegram message to bus");
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(self: Arc<Self>, bus: &MessageBus) -> ChannelResult<()> {
        if self.config.token.is_empty() {
            self.base.set_state(ChannelState::Error).await;
            return Err(ChannelError::start("telegram token is not set"));
        }
        self.base.set_state(ChannelState::Starting).await;

        let outbound_rx = bus.subscribe_channel(TELEGRAM_CHANNEL).await;
        let handle = spawn_delivery(Arc::clone(&self), Arc::clone(&self.base), outbound_rx);
        *self.delivery.lock().await = Some(handle);

        let bus_for_messages = bus.inbound_handle();
        let base_for_messages = Arc::clone(&self.base);
        let allow_for_messages = self.config.allowlist.clone();

        let message_handler = Update::filter_message().endpoint(move |msg: Message| {
            let bus = bus_for_messages.clone();
            let base = Arc::clone(&base_for_messages);
            let allowlist = allow_for_messages.clone();

            async move {
                let chat = msg.chat.id.0.to_string();
                if !sender_allowed(&allowlist, msg.from.as_ref(), &chat) {
                    debug!(chat_id = %chat, "message from unauthorized user/chat");
                    return Ok::<(), teloxide::RequestError>(());
                }

                match classify_message(&msg) {
                    Some(content) => publish(&bus, &base, &chat, msg.from.as_ref(), content).await,
                    None => debug!(chat_id = %chat, "ignoring unsupported message"),
                }
                Ok(())
            }
        });

        let bus_for_queries = bus.inbound_handle();
        let base_for_queries = Arc::clone(&self.base);
        let allow_for_queries = self.config.allowlist.clone();

        let callback_handler =
            Update::filter_callback_query().endpoint(move |bot: Bot, query: CallbackQuery| {
                let bus = bus_for_queries.clone();
                let base = Arc::clone(&base_for_queries);
                let allowlist = allow_for_queries.clone();

                async move {
                    // Stop the client's loading spinner whatever happens next.
                    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
                        warn!(error = %e, "failed to answer callback query");
                    }

                    let chat = query
                        .message
                        .as_ref()
                        .map_or_else(|| query.from.id.to_string(), |m| m.chat().id.0.to_string());
                    if !sender_allowed(&allowlist, Some(&query.from), &chat) {
                        debug!(chat_id = %chat, "button press from unauthorized user/chat");
                        return Ok::<(), teloxide::RequestError>(());
                    }

                    if let Some(data) = query.data.clone() {
                        publish(
                            &bus,
                            &base,
                            &chat,
                            Some(&query.from),
                            InboundContent::Button(data),
                        )
                        .await;
                    }
                    Ok(())
                }
            });

        let handler = dptree::entry()
            .branch(message_handler)
            .branch(callback_handler);

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler).build();
        *self.shutdown.lock().await = Some(dispatcher.shutdown_token());

        tokio::spawn(async move {
            dispatcher.dispatch().await;
        });

        self.base.set_state(ChannelState::Running).await;
        info!("Telegram channel started");

        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping).await;

        if let Some(token) = self.shutdown.lock().await.take()
            && let Ok(done) = token.shutdown()
        {
            done.await;
        }
        if let Some(handle) = self.delivery.lock().await.take() {
            handle.abort();
        }

        self.base.set_state(ChannelState::Stopped).await;
        info!("Telegram channel stopped");

        Ok(())
    }

    async fn deliver(&self, msg: &OutboundMessage) -> ChannelResult<()> {
        let chat_id = ChatId(
            msg.conversation
                .chat_id
                .parse()
                .map_err(|_| ChannelError::send("invalid chat ID"))?,
        );

        match &msg.content {
            OutboundContent::Text {
                text,
                keyboard,
                format,
            } => {
                let chunks = Self::split_message(text, self.config.max_message_length);
                let last = chunks.len().saturating_sub(1);

                for (i, chunk) in chunks.into_iter().enumerate() {
                    let mut request = self.bot.send_message(chat_id, chunk);
                    if *format == MessageFormat::Html {
                        request = request.parse_mode(ParseMode::Html);
                    }
                    if i == last
                        && let Some(keyboard) = keyboard
                    {
                        request = request.reply_markup(inline_markup(keyboard));
                    }
                    request
                        .await
                        .map_err(|e| ChannelError::send(e.to_string()))?;
                }
            }
            OutboundContent::Image(image) => {
                let file = InputFile::memory(image.data.clone()).file_name(image.filename.clone());
                self.bot
                    .send_photo(chat_id, file)
                    .await
                    .map_err(|e| ChannelError::send(e.to_string()))?;
            }
            OutboundContent::Liveness => {
                self.bot
                    .send_chat_action(chat_id, ChatAction::Typing)
                    .await
                    .map_err(|e| ChannelError::send(e.to_string()))?;
            }
        }

        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.build_status().await
    }
}

/// Downloads photos from Telegram's file storage.
#[derive(Clone)]
pub struct TelegramFetcher {
    bot: Bot,
}

impl std::fmt::Debug for TelegramFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramFetcher").finish_non_exhaustive()
    }
}

#[async_trait]
impl ImageFetcher for TelegramFetcher {
    async fn fetch(&self, image: &ImageRef) -> ProviderResult<ImageBuffer> {
        let ImageRef::Remote { file_id } = image else {
            return Err(ProviderError::Request(
                "only Telegram file ids can be downloaded".to_string(),
            ));
        };

        let file = self
            .bot
            .get_file(file_id.clone())
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        debug!(file_id = %file_id, bytes = data.len(), "telegram file downloaded");
        Ok(ImageBuffer::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::KeyButton;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn test_config_from_section() {
        let section = TelegramConfig {
            enabled: true,
            token: "token123".to_string(),
            allow_from: vec!["12345".to_string(), "@alice".to_string()],
        };
        let config = TelegramChannelConfig::from_config(&section);

        assert_eq!(config.token, "token123");
        assert!(config.allowlist.is_sender_allowed("12345", None));
        assert!(config.allowlist.is_sender_allowed("1", Some("alice")));
        assert!(!config.allowlist.is_sender_allowed("99999", None));
        assert!(!format!("{config:?}").contains("token123"));
    }

    #[test]
    fn test_split_message() {
        let short = "Hello, world!";
        let chunks = TelegramChannel::split_message(short, 100);
        assert_eq!(chunks.len(), 1);

        let long = "Line 1\nLine 2\nLine 3\nLine 4";
        let chunks = TelegramChannel::split_message(long, 15);
        assert_eq!(chunks, vec!["Line 1\nLine 2", "Line 3\nLine 4"]);

        let wide = "ж".repeat(10);
        let chunks = TelegramChannel::split_message(&wide, 4);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn test_strip_mention() {
        assert_eq!(strip_mention("/start@picbot_bot"), "/start");
        assert_eq!(strip_mention("/help@picbot_bot now"), "/help now");
        assert_eq!(strip_mention("  red tractor "), "red tractor");
        assert_eq!(strip_mention("mail me@home"), "mail me@home");
    }

    #[test]
    fn test_inline_markup() {
        let keyboard = Keyboard::grid(
            vec![
                KeyButton::callback("Describe", "describe"),
                KeyButton::link("Open", "https://example.com/r"),
                KeyButton::link("Broken", "not a url"),
            ],
            2,
        );
        let markup = inline_markup(&keyboard);

        assert_eq!(markup.inline_keyboard.len(), 1);
        let row = &markup.inline_keyboard[0];
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].text, "Describe");
        assert!(matches!(
            &row[0].kind,
            InlineKeyboardButtonKind::CallbackData(data) if data == "describe"
        ));
        assert!(matches!(&row[1].kind, InlineKeyboardButtonKind::Url(_)));
    }
}
