// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session data model and the session store interface.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ember_model::Message;
use serde::{Deserialize, Serialize};

/// A conversational context keyed by an opaque `session_key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub history: Vec<Message>,
    pub summary: String,
    pub compaction_count: u64,
    pub memory_flush_at_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// The session persistence interface. A filesystem-backed implementation
/// (`FsSessionStore`) is provided as the default; callers may substitute
/// another backend by implementing this trait.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_history(&self, session_key: &str) -> Result<Vec<Message>, SessionStoreError>;
    async fn set_history(
        &self,
        session_key: &str,
        history: Vec<Message>,
    ) -> Result<(), SessionStoreError>;
    async fn add_full_message(
        &self,
        session_key: &str,
        message: Message,
    ) -> Result<(), SessionStoreError>;
    /// Keep only the last `keep_tail_n` messages.
    async fn truncate_history(
        &self,
        session_key: &str,
        keep_tail_n: usize,
    ) -> Result<(), SessionStoreError>;
    async fn get_summary(&self, session_key: &str) -> Result<String, SessionStoreError>;
    async fn set_summary(
        &self,
        session_key: &str,
        summary: String,
    ) -> Result<(), SessionStoreError>;
    async fn get_compaction_state(&self, session_key: &str) -> Result<(u64, u64), SessionStoreError>;
    async fn increment_compaction_count(&self, session_key: &str) -> Result<(), SessionStoreError>;
    async fn mark_memory_flush(&self, session_key: &str) -> Result<(), SessionStoreError>;
    /// Force an atomic flush to durable storage.
    async fn save(&self, session_key: &str) -> Result<(), SessionStoreError>;
}

/// Filesystem-backed session store: one JSON file per session_key under
/// `<workspace>/sessions/<session_key>.json`, written atomically via a
/// temp-file + rename so a crash mid-write never corrupts the prior state.
pub struct FsSessionStore {
    root: PathBuf,
    sessions: tokio::sync::Mutex<std::collections::HashMap<String, Session>>,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn path_for(&self, session_key: &str) -> PathBuf {
        let safe: String = session_key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.json"))
    }

    async fn load_or_default(&self, session_key: &str) -> Session {
        let path = self.path_for(session_key);
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            if let Ok(session) = serde_json::from_str::<Session>(&text) {
                return session;
            }
        }
        Session::default()
    }

    async fn write_atomic(&self, session_key: &str, session: &Session) -> Result<(), SessionStoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SessionStoreError::Io(e.to_string()))?;
        let path = self.path_for(session_key);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(session)
            .map_err(|e| SessionStoreError::Serde(e.to_string()))?;
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| SessionStoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SessionStoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn with_session<F, R>(&self, session_key: &str, f: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut guard = self.sessions.lock().await;
        if !guard.contains_key(session_key) {
            drop(guard);
            let loaded = self.load_or_default(session_key).await;
            guard = self.sessions.lock().await;
            guard.entry(session_key.to_string()).or_insert(loaded);
        }
        let session = guard.get_mut(session_key).unwrap();
        f(session)
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn get_history(&self, session_key: &str) -> Result<Vec<Message>, SessionStoreError> {
        Ok(self.with_session(session_key, |s| s.history.clone()).await)
    }

    async fn set_history(
        &self,
        session_key: &str,
        history: Vec<Message>,
    ) -> Result<(), SessionStoreError> {
        self.with_session(session_key, |s| s.history = history).await;
        Ok(())
    }

    async fn add_full_message(
        &self,
        session_key: &str,
        message: Message,
    ) -> Result<(), SessionStoreError> {
        self.with_session(session_key, |s| s.history.push(message)).await;
        Ok(())
    }

    async fn truncate_history(
        &self,
        session_key: &str,
        keep_tail_n: usize,
    ) -> Result<(), SessionStoreError> {
        self.with_session(session_key, |s| {
            let len = s.history.len();
            if len > keep_tail_n {
                s.history.drain(0..len - keep_tail_n);
            }
        })
        .await;
        Ok(())
    }

    async fn get_summary(&self, session_key: &str) -> Result<String, SessionStoreError> {
        Ok(self.with_session(session_key, |s| s.summary.clone()).await)
    }

    async fn set_summary(
        &self,
        session_key: &str,
        summary: String,
    ) -> Result<(), SessionStoreError> {
        self.with_session(session_key, |s| s.summary = summary).await;
        Ok(())
    }

    async fn get_compaction_state(&self, session_key: &str) -> Result<(u64, u64), SessionStoreError> {
        Ok(self
            .with_session(session_key, |s| (s.compaction_count, s.memory_flush_at_count))
            .await)
    }

    async fn increment_compaction_count(&self, session_key: &str) -> Result<(), SessionStoreError> {
        self.with_session(session_key, |s| s.compaction_count += 1).await;
        Ok(())
    }

    async fn mark_memory_flush(&self, session_key: &str) -> Result<(), SessionStoreError> {
        self.with_session(session_key, |s| {
            s.memory_flush_at_count = s.compaction_count;
        })
        .await;
        Ok(())
    }

    async fn save(&self, session_key: &str) -> Result<(), SessionStoreError> {
        let snapshot = self.with_session(session_key, |s| s.clone()).await;
        self.write_atomic(session_key, &snapshot).await
    }
}

pub fn sessions_dir(workspace: &Path) -> PathBuf {
    workspace.join("sessions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_model::Message;

    #[tokio::test]
    async fn add_and_get_history_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        store.add_full_message("s1", Message::user("hi")).await.unwrap();
        let h = store.get_history("s1").await.unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(h[0].content, "hi");
    }

    #[tokio::test]
    async fn truncate_keeps_only_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        for i in 0..10 {
            store.add_full_message("s1", Message::user(format!("{i}"))).await.unwrap();
        }
        store.truncate_history("s1", 4).await.unwrap();
        let h = store.get_history("s1").await.unwrap();
        assert_eq!(h.len(), 4);
        assert_eq!(h[0].content, "6");
        assert_eq!(h[3].content, "9");
    }

    #[tokio::test]
    async fn save_persists_across_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsSessionStore::new(dir.path());
            store.add_full_message("s1", Message::user("hi")).await.unwrap();
            store.set_summary("s1", "a summary".into()).await.unwrap();
            store.save("s1").await.unwrap();
        }
        let store2 = FsSessionStore::new(dir.path());
        let h = store2.get_history("s1").await.unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(store2.get_summary("s1").await.unwrap(), "a summary");
    }

    #[tokio::test]
    async fn compaction_state_increments() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        store.increment_compaction_count("s1").await.unwrap();
        store.increment_compaction_count("s1").await.unwrap();
        let (count, flush_at) = store.get_compaction_state("s1").await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(flush_at, 0);
        store.mark_memory_flush("s1").await.unwrap();
        let (count, flush_at) = store.get_compaction_state("s1").await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(flush_at, 2);
    }

    #[tokio::test]
    async fn separate_session_keys_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        store.add_full_message("a", Message::user("a-msg")).await.unwrap();
        store.add_full_message("b", Message::user("b-msg")).await.unwrap();
        assert_eq!(store.get_history("a").await.unwrap().len(), 1);
        assert_eq!(store.get_history("b").await.unwrap().len(), 1);
        assert_eq!(store.get_history("a").await.unwrap()[0].content, "a-msg");
    }
}
