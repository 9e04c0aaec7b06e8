//! Unified error types for picbot.
//!
//! Every module owns a small error enum; all of them convert into the main
//! [`BotError`] type used by the binary and the gateway.

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for picbot operations.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Message bus error.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// Channel error.
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Session storage error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// External collaborator error.
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    /// Dialog flow error.
    #[error("flow: {0}")]
    Flow(#[from] FlowError),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// Create a config error from a string.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }
}

/// Result type alias for picbot operations.
pub type Result<T> = std::result::Result<T, BotError>;

// ============================================================================
// Message Bus Errors
// ============================================================================

/// Error type for message bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Failed to send inbound message.
    #[error("inbound channel closed")]
    InboundClosed,

    /// No channel subscribed for an outbound message.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
}

/// Result type for message bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

// ============================================================================
// Channel Errors
// ============================================================================

/// Error type for channel (transport) operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to start the channel.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// Failed to send message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Channel is not connected.
    #[error("not connected")]
    NotConnected,

    /// Message bus rejected the message.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Internal error.
    #[error("{0}")]
    Internal(String),
}

impl ChannelError {
    /// Create a start failed error.
    #[inline]
    pub fn start(msg: impl Into<String>) -> Self {
        Self::StartFailed(msg.into())
    }

    /// Create a send failed error.
    #[inline]
    pub fn send(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Missing required field.
    #[error("missing: {0}")]
    Missing(String),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create a missing field error.
    #[inline]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Storage Errors
// ============================================================================

/// Error type for session storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Provider (collaborator) Errors
// ============================================================================

/// Failure of an external collaborator: search, captioning, similarity,
/// translation, file relay or image download.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The collaborator has no credentials or endpoint configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Transport-level request failure.
    #[error("request error: {0}")]
    Request(String),

    /// The collaborator answered with a non-success status.
    #[error("API error: HTTP {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// The response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Result type for collaborator calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// Dialog Flow Errors
// ============================================================================

/// Error type for a single workflow step.
///
/// None of these are fatal to the process; the dialog recovers from each of
/// them inside the conversation that produced it.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Session data the current step depends on is absent.
    #[error("missing session data: {0}")]
    MissingData(&'static str),

    /// The user's image could not be materialised into bytes.
    #[error("image unavailable: {0}")]
    Acquire(#[source] ProviderError),

    /// Session storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Outbound delivery failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Result type for dialog flow operations.
pub type FlowResult<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let bot_err: BotError = BusError::InboundClosed.into();
        assert!(matches!(bot_err, BotError::Bus(_)));

        let bot_err: BotError = ProviderError::NotConfigured("image search").into();
        assert!(matches!(bot_err, BotError::Provider(_)));

        let flow: FlowError = ChannelError::NotConnected.into();
        assert!(matches!(flow, FlowError::Channel(_)));
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Api {
            status: 503,
            body: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "API error: HTTP 503: busy");
        assert_eq!(
            ProviderError::NotConfigured("captioning").to_string(),
            "captioning is not configured"
        );
    }
}
