//! Message events exchanged between channels and the dialog.
//!
//! Inbound messages are already normalized by the channel into one of three
//! content kinds (text, photo, button press); outbound messages carry text
//! with an optional keyboard, an image, or a lightweight chat action.

use crate::util::generate_message_id;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// Stable identity of one conversation: the channel plus the chat within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    /// Channel identifier (e.g., "telegram", "cli").
    pub channel: String,
    /// Chat identifier within the channel.
    pub chat_id: String,
}

impl ConversationId {
    /// Create a conversation id.
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Storage key for this conversation, e.g. `telegram:123456`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.chat_id)
    }
}

/// Opaque handle to a photo submitted by the user.
///
/// Only the handle lives in session data; bytes are materialized on demand
/// and released right after each operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// File stored by the messaging platform.
    Remote {
        /// Platform file identifier.
        file_id: String,
    },
    /// File on the local filesystem (CLI channel).
    Local {
        /// Path to the image.
        path: PathBuf,
    },
    /// Raw bytes carried inline.
    Inline {
        /// Image bytes, base64 in serialized form.
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

/// Content of an inbound event, already classified by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InboundContent {
    /// Free text typed by the user.
    Text(String),
    /// A photo.
    Photo(ImageRef),
    /// A button press carrying the button's value.
    Button(String),
}

/// An inbound message from a channel to the dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message ID.
    pub id: String,
    /// Conversation the message belongs to.
    pub conversation: ConversationId,
    /// Sender's identifier within the channel.
    pub sender_id: String,
    /// Classified content.
    pub content: InboundContent,
    /// Sender's preferred language (IETF tag), if the platform reports one.
    pub language: Option<String>,
    /// Timestamp when the message was received.
    pub timestamp: SystemTime,
}

impl InboundMessage {
    /// Create a new inbound message.
    pub fn new(
        conversation: ConversationId,
        sender_id: impl Into<String>,
        content: InboundContent,
    ) -> Self {
        Self {
            id: generate_message_id(),
            conversation,
            sender_id: sender_id.into(),
            content,
            language: None,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a text message.
    pub fn text(conversation: ConversationId, text: impl Into<String>) -> Self {
        Self::new(conversation, "user", InboundContent::Text(text.into()))
    }

    /// Create a photo message.
    pub fn photo(conversation: ConversationId, image: ImageRef) -> Self {
        Self::new(conversation, "user", InboundContent::Photo(image))
    }

    /// Create a button press message.
    pub fn button(conversation: ConversationId, value: impl Into<String>) -> Self {
        Self::new(conversation, "user", InboundContent::Button(value.into()))
    }

    /// Set the sender's language.
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Session key for this conversation.
    #[must_use]
    pub fn session_key(&self) -> String {
        self.conversation.key()
    }
}

/// A keyboard attached to an outbound text message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    /// Button rows, top to bottom.
    pub rows: Vec<Vec<KeyButton>>,
}

impl Keyboard {
    /// Lay buttons out in rows of `cols`.
    #[must_use]
    pub fn grid(buttons: Vec<KeyButton>, cols: usize) -> Self {
        let cols = cols.max(1);
        let mut rows = Vec::new();
        let mut row = Vec::with_capacity(cols);
        for button in buttons {
            row.push(button);
            if row.len() == cols {
                rows.push(std::mem::take(&mut row));
            }
        }
        if !row.is_empty() {
            rows.push(row);
        }
        Self { rows }
    }

    /// Append a row.
    #[must_use]
    pub fn with_row(mut self, row: Vec<KeyButton>) -> Self {
        self.rows.push(row);
        self
    }

    /// Iterate over all buttons.
    pub fn buttons(&self) -> impl Iterator<Item = &KeyButton> {
        self.rows.iter().flatten()
    }
}

/// A single keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyButton {
    /// Text shown on the button.
    pub label: String,
    /// What pressing it does.
    pub action: ButtonAction,
}

impl KeyButton {
    /// Button that sends `value` back as a button press.
    pub fn callback(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(value.into()),
        }
    }

    /// Button that opens a URL.
    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Button behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    /// Report the value back as an inbound button press.
    Callback(String),
    /// Open a link.
    Url(String),
}

/// Binary image ready for delivery.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Encoded image bytes.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// MIME type, e.g. `image/jpeg`.
    pub mime: String,
    /// Suggested file name, e.g. `03.jpg`.
    pub filename: String,
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("filename", &self.filename)
            .field("mime", &self.mime)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Message format hint for rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    /// Plain text, no formatting.
    #[default]
    Plain,
    /// HTML formatted text.
    Html,
}

/// Payload of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundContent {
    /// Text with an optional keyboard.
    Text {
        /// Message text.
        text: String,
        /// Attached keyboard.
        keyboard: Option<Keyboard>,
        /// Rendering hint.
        format: MessageFormat,
    },
    /// An image.
    Image(ImagePayload),
    /// "Still working" indicator (typing action on Telegram).
    Liveness,
}

/// An outbound message from the dialog to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Unique message ID.
    pub id: String,
    /// Target conversation.
    pub conversation: ConversationId,
    /// What to deliver.
    pub content: OutboundContent,
}

impl OutboundMessage {
    /// Create a new outbound message.
    #[must_use]
    pub fn new(conversation: ConversationId, content: OutboundContent) -> Self {
        Self {
            id: generate_message_id(),
            conversation,
            content,
        }
    }

    /// Plain text message.
    pub fn text(
        conversation: ConversationId,
        text: impl Into<String>,
        keyboard: Option<Keyboard>,
    ) -> Self {
        Self::new(
            conversation,
            OutboundContent::Text {
                text: text.into(),
                keyboard,
                format: MessageFormat::Plain,
            },
        )
    }

    /// Target channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.conversation.channel
    }
}

/// Serde adapter storing bytes as base64 strings.
mod base64_bytes {
    use super::{BASE64, Deserialize, Deserializer, Serializer};
    use base64::Engine as _;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key() {
        let conv = ConversationId::new("telegram", "42");
        assert_eq!(conv.key(), "telegram:42");
        assert_eq!(conv.to_string(), "telegram:42");

        let msg = InboundMessage::text(conv, "hello");
        assert_eq!(msg.session_key(), "telegram:42");
    }

    #[test]
    fn test_keyboard_grid() {
        let buttons = ["1", "5", "10", "20", "40"]
            .iter()
            .map(|v| KeyButton::callback(*v, *v))
            .collect();
        let keyboard = Keyboard::grid(buttons, 3);
        assert_eq!(keyboard.rows.len(), 2);
        assert_eq!(keyboard.rows[0].len(), 3);
        assert_eq!(keyboard.rows[1].len(), 2);
        assert_eq!(keyboard.buttons().count(), 5);
    }

    #[test]
    fn test_image_ref_serialized_form() {
        let image = ImageRef::Inline {
            data: vec![1, 2, 3],
        };
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["kind"], "inline");
        assert_eq!(json["data"], "AQID");

        let remote: ImageRef =
            serde_json::from_str(r#"{"kind":"remote","file_id":"AgAD"}"#).unwrap();
        assert_eq!(
            remote,
            ImageRef::Remote {
                file_id: "AgAD".to_string()
            }
        );
    }

    #[test]
    fn test_image_payload_debug_hides_bytes() {
        let payload = ImagePayload {
            data: vec![0; 2048],
            mime: "image/png".to_string(),
            filename: "00.png".to_string(),
        };
        let debug = format!("{payload:?}");
        assert!(debug.contains("len: 2048"));
        assert!(!debug.contains("0, 0"));
    }
}
