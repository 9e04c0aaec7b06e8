//! Configuration: a JSON file under `~/.picbot` plus environment overrides.
//!
//! Every field has a default, so a partial file (or none at all) still loads.
//! Secrets are usually supplied through the environment instead of the file.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub use crate::util::config_path;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Telegram transport.
    pub telegram: TelegramConfig,
    /// Image search provider.
    pub search: SearchConfig,
    /// Translation provider.
    pub translate: TranslateConfig,
    /// Captioning / question answering service.
    pub caption: CaptionConfig,
    /// Reverse image similarity lookup.
    pub similarity: SimilarityConfig,
    /// Dialog tuning.
    pub dialog: DialogConfig,
    /// Session persistence.
    pub sessions: SessionsConfig,
}

/// Telegram channel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Whether the channel is started by `picbot run`.
    pub enabled: bool,
    /// Bot token from @BotFather.
    pub token: String,
    /// User ids or usernames allowed to talk to the bot. Empty allows everyone.
    pub allow_from: Vec<String>,
}

/// Google Custom Search settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// API key.
    pub api_key: String,
    /// Search engine id.
    pub cx: String,
    /// Provider maximum per request sequence.
    pub max_results: u32,
    /// Safe search level: `active`, `medium` or `off`.
    pub safe: String,
    /// Accepted file types, `|`-separated.
    pub file_types: String,
    /// Results larger than this on either side are scaled down; 0 keeps them as is.
    pub max_dimension: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            cx: String::new(),
            max_results: 50,
            safe: "medium".to_string(),
            file_types: "jpg|gif|png".to_string(),
            max_dimension: 800,
        }
    }
}

/// Yandex Cloud translation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// API key.
    pub api_key: String,
    /// Cloud folder id, required for user-account keys only.
    pub folder_id: Option<String>,
}

/// Captioning service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    /// Base URL of the service exposing `/caption` and `/answer`.
    pub endpoint: String,
    /// Captions requested per describe.
    pub captions: u32,
    /// Language the model produces.
    pub model_language: String,
    /// Language replies are translated to.
    pub language: String,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            captions: 3,
            model_language: "en".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Similarity lookup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// File relay used to publish the image under a temporary URL.
    pub relay_endpoint: String,
    /// Reverse image lookup service.
    pub lookup_endpoint: String,
    /// Similar images kept per lookup.
    pub max_similar: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            relay_endpoint: String::new(),
            lookup_endpoint: String::new(),
            max_similar: 20,
        }
    }
}

/// Dialog tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// Counts above this get a "will take a while" notice.
    pub slow_threshold: u32,
    /// Seconds between liveness signals during a long operation.
    pub liveness_interval_secs: u64,
    /// Quick-pick buttons offered with the count prompt.
    pub count_buttons: Vec<u32>,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            slow_threshold: 14,
            liveness_interval_secs: 4,
            count_buttons: vec![1, 5, 10, 20, 40, 50],
        }
    }
}

/// Session storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Process memory; lost on restart.
    #[default]
    Memory,
    /// One JSON file per conversation.
    File,
}

/// Session persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Backend kind.
    pub backend: SessionBackend,
    /// Directory for the file backend; defaults to `~/.picbot/sessions`.
    pub path: Option<String>,
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// The bot cannot run like this.
    Error,
    /// A feature will be unavailable.
    Warning,
}

/// A problem found by [`BotConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Human-readable description.
    pub message: String,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            IssueLevel::Error => "error",
            IssueLevel::Warning => "warning",
        };
        write!(f, "{level}: {}", self.message)
    }
}

impl BotConfig {
    /// Override secrets and endpoints from the environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    fn apply_env_with(&mut self, var: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, name: &str| {
            if let Some(value) = var(name).filter(|v| !v.is_empty()) {
                debug!(var = name, "config overridden from environment");
                *target = value;
            }
        };
        set(&mut self.telegram.token, "TELEGRAM_BOT_TOKEN");
        set(&mut self.search.api_key, "GOOGLE_API_KEY");
        set(&mut self.search.cx, "GOOGLE_CX");
        set(&mut self.translate.api_key, "YANDEX_API_KEY");
        set(&mut self.caption.endpoint, "CAPTION_ENDPOINT");
    }

    /// Check the configuration for problems.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.telegram.enabled && self.telegram.token.is_empty() {
            issues.push(ConfigIssue::error(
                "telegram is enabled but no token is set (telegram.token or TELEGRAM_BOT_TOKEN)",
            ));
        }
        if self.search.api_key.is_empty() || self.search.cx.is_empty() {
            issues.push(ConfigIssue::warning(
                "image search disabled: search.api_key and search.cx are required",
            ));
        }
        if self.search.max_results == 0 {
            issues.push(ConfigIssue::error("search.max_results must be at least 1"));
        }
        if !matches!(self.search.safe.as_str(), "active" | "medium" | "high" | "off") {
            issues.push(ConfigIssue::error(format!(
                "search.safe has unknown value {:?}",
                self.search.safe
            )));
        }
        if self.caption.endpoint.is_empty() {
            issues.push(ConfigIssue::warning(
                "describe and questions disabled: caption.endpoint is not set",
            ));
        } else if let Err(e) = url::Url::parse(&self.caption.endpoint) {
            issues.push(ConfigIssue::error(format!("caption.endpoint: {e}")));
        }
        if self.caption.language != self.caption.model_language && self.translate.api_key.is_empty()
        {
            issues.push(ConfigIssue::warning(format!(
                "replies stay in {:?}: translate.api_key is not set",
                self.caption.model_language
            )));
        }
        if self.similarity.relay_endpoint.is_empty() || self.similarity.lookup_endpoint.is_empty() {
            issues.push(ConfigIssue::warning(
                "similar images disabled: similarity.relay_endpoint and lookup_endpoint are required",
            ));
        }
        for (name, value) in [
            ("similarity.relay_endpoint", &self.similarity.relay_endpoint),
            ("similarity.lookup_endpoint", &self.similarity.lookup_endpoint),
        ] {
            if !value.is_empty()
                && let Err(e) = url::Url::parse(value)
            {
                issues.push(ConfigIssue::error(format!("{name}: {e}")));
            }
        }
        if self.dialog.liveness_interval_secs == 0 {
            issues.push(ConfigIssue::error(
                "dialog.liveness_interval_secs must be at least 1",
            ));
        }
        if self.dialog.count_buttons.contains(&0) {
            issues.push(ConfigIssue::warning("dialog.count_buttons contains 0"));
        }

        issues
    }

    /// Whether [`validate`](Self::validate) reports any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|issue| issue.level == IssueLevel::Error)
    }
}

/// Load the configuration from the default path, applying env overrides.
///
/// A missing file yields the defaults.
pub async fn load_config() -> ConfigResult<BotConfig> {
    load_config_from(&config_path()).await
}

/// Load the configuration from `path`, applying env overrides.
pub async fn load_config_from(path: &Path) -> ConfigResult<BotConfig> {
    let mut config = match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            BotConfig::default()
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };
    config.apply_env();
    Ok(config)
}

/// Write `config` to `path` as pretty JSON, creating parent directories.
pub async fn save_config(config: &BotConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Write a default configuration to the default path.
pub async fn init_config() -> ConfigResult<()> {
    save_config(&BotConfig::default(), &config_path()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: BotConfig =
            serde_json::from_str(r#"{"search":{"cx":"abc"},"sessions":{"backend":"file"}}"#)
                .unwrap();
        assert_eq!(config.search.cx, "abc");
        assert_eq!(config.search.max_results, 50);
        assert_eq!(config.dialog.slow_threshold, 14);
        assert_eq!(config.dialog.count_buttons, vec![1, 5, 10, 20, 40, 50]);
        assert_eq!(config.sessions.backend, SessionBackend::File);
        assert_eq!(config.similarity.max_similar, 20);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BotConfig::default();
        config.apply_env_with(|name| match name {
            "TELEGRAM_BOT_TOKEN" => Some("123:abc".to_string()),
            "GOOGLE_CX" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.telegram.token, "123:abc");
        assert!(config.search.cx.is_empty());
    }

    #[test]
    fn test_validate() {
        let mut config = BotConfig::default();
        config.telegram.enabled = true;
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.level == IssueLevel::Error));
        assert!(config.has_errors());

        config.telegram.token = "t".to_string();
        config.search.api_key = "k".to_string();
        config.search.cx = "cx".to_string();
        config.caption.endpoint = "http://localhost:8000".to_string();
        config.similarity.relay_endpoint = "http://localhost:8001/files".to_string();
        config.similarity.lookup_endpoint = "http://localhost:8002/lookup".to_string();
        assert!(config.validate().is_empty());

        config.caption.endpoint = "not a url".to_string();
        assert!(config.has_errors());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = std::env::temp_dir().join(crate::util::generate_id("picbot-config"));
        let path = dir.join("config.json");

        let mut config = BotConfig::default();
        config.dialog.slow_threshold = 20;
        save_config(&config, &path).await.unwrap();

        let loaded: BotConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.dialog.slow_threshold, 20);

        let missing = load_config_from(&dir.join("absent.json")).await.unwrap();
        assert_eq!(missing.search.max_results, 50);

        let _ = std::fs::remove_dir_all(dir);
    }
}
