//! Event classification.
//!
//! Turns an inbound message plus the conversation's current state into the
//! typed shape the route table matches on.

use super::state::DialogState;
use crate::events::{ConversationId, ImageRef, InboundContent, InboundMessage};

/// Kind of content carried by an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// Free text.
    Text,
    /// A photo.
    Photo,
    /// A button press.
    Button,
}

/// A classified inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Conversation the event belongs to.
    pub conversation: ConversationId,
    /// State the conversation was in when the event was classified.
    pub state: DialogState,
    /// Content kind.
    pub kind: ContentKind,
    /// Text or button value; empty for photos.
    pub value: String,
    /// The photo, for [`ContentKind::Photo`].
    pub image: Option<ImageRef>,
    /// Sender's language, if known.
    pub language: Option<String>,
}

impl Event {
    /// Classify `message` against `state`.
    #[must_use]
    pub fn classify(message: &InboundMessage, state: DialogState) -> Self {
        let (kind, value, image) = match &message.content {
            InboundContent::Text(text) => (ContentKind::Text, text.trim().to_string(), None),
            InboundContent::Button(value) => (ContentKind::Button, value.clone(), None),
            InboundContent::Photo(image) => (ContentKind::Photo, String::new(), Some(image.clone())),
        };
        Self {
            conversation: message.conversation.clone(),
            state,
            kind,
            value,
            image,
            language: message.language.clone(),
        }
    }
}
