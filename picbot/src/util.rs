//! Small shared helpers: timestamps, ids and well-known paths.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the per-user configuration directory.
const APP_DIR: &str = ".picbot";

/// Current Unix time in milliseconds.
#[must_use]
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Generate a unique id with the given prefix, e.g. `msg_3f2a...`.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// Generate a unique message id.
#[must_use]
pub fn generate_message_id() -> String {
    generate_id("msg")
}

/// The user's home directory, falling back to the working directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `~/.picbot`
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().join(APP_DIR)
}

/// `~/.picbot/config.json`
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// `~/.picbot/sessions`
#[must_use]
pub fn sessions_dir() -> PathBuf {
    config_dir().join("sessions")
}

/// Truncate a string to at most `max` characters, appending `...` when cut.
#[must_use]
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let a = generate_id("msg");
        let b = generate_id("msg");
        assert!(a.starts_with("msg_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("жёлтый экскаватор", 6), "жёлтый...");
    }

    #[test]
    fn test_paths() {
        assert!(config_path().ends_with(".picbot/config.json"));
        assert!(sessions_dir().ends_with(".picbot/sessions"));
    }
}
