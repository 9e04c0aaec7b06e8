//! Conversation states.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Where a conversation currently is in its workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogState {
    /// Nothing in progress. Initial and terminal state.
    #[default]
    Idle,
    /// A search query is stored; waiting for how many images to return.
    AwaitingResultCount,
    /// A photo is stored; waiting for the user to pick an action.
    ImageMenu,
    /// A photo is stored; waiting for a free-form question about it.
    AwaitingQuestion,
}

impl DialogState {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingResultCount => "awaiting_result_count",
            Self::ImageMenu => "image_menu",
            Self::AwaitingQuestion => "awaiting_question",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "idle" => Some(Self::Idle),
            "awaiting_result_count" => Some(Self::AwaitingResultCount),
            "image_menu" => Some(Self::ImageMenu),
            "awaiting_question" => Some(Self::AwaitingQuestion),
            _ => None,
        }
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Stored sessions may carry a state written by another version; anything we
// do not recognise decodes as `Idle`.
impl<'de> Deserialize<'de> for DialogState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name
            .as_deref()
            .and_then(Self::from_name)
            .unwrap_or_default())
    }
}
