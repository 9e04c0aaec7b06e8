//! Session storage backends.
//!
//! Provides different storage implementations for session persistence.

use crate::dialog::DialogState;
use crate::error::StorageResult;
use crate::util::timestamp_ms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// Session data stored in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Session key (e.g., "telegram:123456").
    pub key: String,
    /// Current dialog state.
    #[serde(default)]
    pub state: DialogState,
    /// State-scoped data bag.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Session creation timestamp.
    #[serde(default)]
    pub created_at: u64,
    /// Last activity timestamp.
    #[serde(default)]
    pub updated_at: u64,
}

impl SessionData {
    /// Create a new idle session.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        let now = timestamp_ms();
        Self {
            key: key.into(),
            state: DialogState::Idle,
            data: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trait for session storage backends.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Load a session by key.
    async fn load(&self, key: &str) -> StorageResult<Option<SessionData>>;

    /// Save a session.
    async fn save(&self, session: &SessionData) -> StorageResult<()>;

    /// Delete a session.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List all session keys.
    async fn list_keys(&self) -> StorageResult<Vec<String>>;

    /// Check if a session exists.
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.load(key).await?.is_some())
    }
}

/// In-memory session storage.
///
/// Fast but not persistent across restarts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl MemoryStorage {
    /// Create a new memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn load(&self, key: &str) -> StorageResult<Option<SessionData>> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn save(&self, session: &SessionData) -> StorageResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.sessions.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.sessions.read().await.keys().cloned().collect())
    }
}

/// File-based session storage.
///
/// Persists sessions as JSON files in a directory, one file per conversation.
#[derive(Debug)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new file storage with the given base path.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create file storage in the default location (~/.picbot/sessions).
    #[must_use]
    pub fn default_path() -> Self {
        Self::new(crate::util::sessions_dir())
    }

    /// Directory holding the session files.
    #[must_use]
    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    fn session_path(&self, key: &str) -> PathBuf {
        // Channel names never contain '_', chat ids may be negative numbers.
        let safe_key = key.replace([':', '/', '\\'], "_");
        self.base_path.join(format!("{safe_key}.json"))
    }

    async fn ensure_dir(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for FileStorage {
    async fn load(&self, key: &str) -> StorageResult<Option<SessionData>> {
        let path = self.session_path(key);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session: SessionData = serde_json::from_str(&content)?;
        debug!(key = %key, "loaded session from file");
        Ok(Some(session))
    }

    async fn save(&self, session: &SessionData) -> StorageResult<()> {
        self.ensure_dir().await?;

        let path = self.session_path(&session.key);
        let content = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&path, content).await?;
        debug!(key = %session.key, "saved session to file");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.session_path(key);

        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            debug!(key = %key, "deleted session file");
        }
        Ok(())
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_dir().await?;

        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem()
            {
                // Restore "channel:chat" from "channel_chat".
                let key = stem.to_string_lossy().replacen('_', ":", 1);
                keys.push(key);
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "picbot-{name}-{}",
            crate::util::generate_id("test")
        ))
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();

        let mut session = SessionData::new("test:123");
        session.state = DialogState::ImageMenu;
        session
            .data
            .insert("query".to_string(), serde_json::json!("red tractor"));
        storage.save(&session).await.unwrap();

        let loaded = storage.load("test:123").await.unwrap().unwrap();
        assert_eq!(loaded.state, DialogState::ImageMenu);
        assert_eq!(loaded.data["query"], "red tractor");

        assert_eq!(storage.list_keys().await.unwrap().len(), 1);

        storage.delete("test:123").await.unwrap();
        assert!(storage.load("test:123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = temp_dir("sessions");
        let storage = FileStorage::new(&dir);

        assert!(storage.load("telegram:-100").await.unwrap().is_none());

        let mut session = SessionData::new("telegram:-100");
        session.state = DialogState::AwaitingQuestion;
        storage.save(&session).await.unwrap();

        assert!(storage.exists("telegram:-100").await.unwrap());
        let keys = storage.list_keys().await.unwrap();
        assert_eq!(keys, vec!["telegram:-100".to_string()]);

        storage.delete("telegram:-100").await.unwrap();
        assert!(!storage.exists("telegram:-100").await.unwrap());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_session_data_tolerates_missing_fields() {
        let data: SessionData =
            serde_json::from_str(r#"{"key":"cli:local","state":"somewhere_else"}"#).unwrap();
        assert_eq!(data.state, DialogState::Idle);
        assert!(data.data.is_empty());
    }
}
