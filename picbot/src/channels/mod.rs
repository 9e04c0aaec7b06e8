//! Chat transports.
//!
//! - [`cli::CliChannel`] - terminal channel (always available)
//! - [`telegram::TelegramChannel`] - Telegram bot (requires the `telegram` feature)

pub mod cli;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use cli::{CLI_CHANNEL, CliChannel, CliChannelConfig, run_interactive};

#[cfg(feature = "telegram")]
pub use telegram::{TELEGRAM_CHANNEL, TelegramChannel, TelegramChannelConfig, TelegramFetcher};
