//! Session store: per-conversation state with atomic updates.

use super::locks::KeyedLocks;
use super::storage::{SessionData, SessionStorage};
use crate::dialog::DialogState;
use crate::error::StorageResult;
use crate::events::ConversationId;
use crate::util::timestamp_ms;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// A conversation session: one state plus a state-scoped data bag.
#[derive(Debug, Clone)]
pub struct Session {
    data: SessionData,
    modified: bool,
}

impl Session {
    /// A fresh `Idle` session that is not backed by any store.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            data: SessionData::new(key),
            modified: false,
        }
    }

    const fn from_data(data: SessionData) -> Self {
        Self {
            data,
            modified: false,
        }
    }

    /// Get the session key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.data.key
    }

    /// Current dialog state.
    #[must_use]
    pub const fn state(&self) -> DialogState {
        self.data.state
    }

    /// Move to another state. Data is left untouched.
    pub fn set_state(&mut self, state: DialogState) {
        if self.data.state != state {
            self.data.state = state;
            self.touch();
        }
    }

    /// Read a typed value. Missing keys and values of the wrong shape are
    /// both reported as absent.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.data.data.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key = %key, error = %e, "ignoring malformed session value");
                None
            }
        }
    }

    /// Store a value under `key`.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.data.data.insert(key.to_string(), v);
                self.touch();
            }
            Err(e) => warn!(key = %key, error = %e, "cannot store session value"),
        }
    }

    /// Remove a value and return it, if it was present and well-formed.
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.data.data.remove(key)?;
        self.touch();
        serde_json::from_value(value).ok()
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) {
        if self.data.data.remove(key).is_some() {
            self.touch();
        }
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.data.contains_key(key)
    }

    /// Back to `Idle` with an empty data bag.
    pub fn reset(&mut self) {
        self.data.state = DialogState::Idle;
        self.data.data.clear();
        self.touch();
    }

    /// Check if the session has been modified since it was loaded.
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    /// Creation timestamp (Unix milliseconds).
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.data.created_at
    }

    fn touch(&mut self) {
        self.data.updated_at = timestamp_ms();
        self.modified = true;
    }
}

/// Key-addressed session store with per-conversation mutual exclusion.
///
/// [`SessionStore::update`] runs its mutation under a lock held for that
/// conversation only, so two events from one chat never interleave a
/// read-modify-write while other chats proceed in parallel. The lock is held
/// for the mutation alone; callers run slow work between updates.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    locks: KeyedLocks,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a store over the given storage backend.
    pub fn new(storage: impl SessionStorage + 'static) -> Self {
        Self::from_arc(Arc::new(storage))
    }

    /// Create a store over a shared storage backend.
    #[must_use]
    pub fn from_arc(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
        }
    }

    /// Snapshot of the session, or a fresh `Idle` one.
    ///
    /// Never fails: a backend error is logged and treated as "no session".
    pub async fn get(&self, conversation: &ConversationId) -> Session {
        let key = conversation.key();
        self.load(&key).await
    }

    /// Apply `mutation` atomically with respect to other updates of the same
    /// conversation, persisting the result if it changed anything.
    pub async fn update<F, R>(&self, conversation: &ConversationId, mutation: F) -> StorageResult<R>
    where
        F: FnOnce(&mut Session) -> R + Send,
        R: Send,
    {
        let key = conversation.key();
        let _guard = self.locks.lock(&key).await;

        let mut session = self.load(&key).await;
        let out = mutation(&mut session);
        if session.is_modified() {
            self.storage.save(&session.data).await?;
            debug!(key = %key, state = %session.state(), "session saved");
        }
        Ok(out)
    }

    /// Set the conversation back to `Idle` with cleared data.
    pub async fn reset(&self, conversation: &ConversationId) -> StorageResult<()> {
        self.update(conversation, Session::reset).await
    }

    /// List stored conversation keys.
    pub async fn list(&self) -> StorageResult<Vec<String>> {
        self.storage.list_keys().await
    }

    async fn load(&self, key: &str) -> Session {
        match self.storage.load(key).await {
            Ok(Some(data)) => Session::from_data(data),
            Ok(None) => Session::new(key),
            Err(e) => {
                warn!(key = %key, error = %e, "session load failed, starting fresh");
                Session::new(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::storage::MemoryStorage;
    use super::*;

    fn conv() -> ConversationId {
        ConversationId::new("test", "123")
    }

    #[tokio::test]
    async fn test_get_creates_idle_session() {
        let store = SessionStore::new(MemoryStorage::new());
        let session = store.get(&conv()).await;
        assert_eq!(session.key(), "test:123");
        assert_eq!(session.state(), DialogState::Idle);
        assert!(!session.is_modified());
    }

    #[tokio::test]
    async fn test_update_persists_changes() {
        let store = SessionStore::new(MemoryStorage::new());
        store
            .update(&conv(), |s| {
                s.set("query", &"red tractor");
                s.set_state(DialogState::AwaitingResultCount);
            })
            .await
            .unwrap();

        let session = store.get(&conv()).await;
        assert_eq!(session.state(), DialogState::AwaitingResultCount);
        assert_eq!(session.get::<String>("query").as_deref(), Some("red tractor"));

        store.reset(&conv()).await.unwrap();
        let session = store.get(&conv()).await;
        assert_eq!(session.state(), DialogState::Idle);
        assert!(!session.contains("query"));
    }

    #[test]
    fn test_malformed_value_is_absent() {
        let mut session = Session::new("k");
        session.set("count", &"not a number");
        assert_eq!(session.get::<u32>("count"), None);
        assert_eq!(session.get::<u32>("missing"), None);
        assert_eq!(session.take::<String>("count").as_deref(), Some("not a number"));
        assert!(!session.contains("count"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_interleave() {
        let store = SessionStore::new(MemoryStorage::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .update(&conv(), |s| {
                        let n = s.get::<u32>("n").unwrap_or(0);
                        s.set("n", &(n + 1));
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.get(&conv()).await.get::<u32>("n"), Some(16));
    }
}
