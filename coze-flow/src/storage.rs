use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::{CozeError, Result},
    state::{Generation, GenerationToken, PageState, Toast},
};

/// Server-side stand-in for one mounted image-to-prompt page.
#[derive(Debug, Clone, Serialize)]
pub struct PageSession {
    pub id: String,
    pub state: PageState,
    /// Every toast shown on this page, oldest first.
    pub toasts: Vec<Toast>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub generation: Generation,
}

impl PageSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: PageState::default(),
            toasts: Vec::new(),
            created_at: now,
            updated_at: now,
            generation: Generation::new(),
        }
    }
}

impl Default for PageSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for storing and retrieving page sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: PageSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<PageSession>>;
    /// Remove the session and invalidate work still running for it.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Mark the session as loading and return its state from before the
    /// mark. Fails if a cycle is already running.
    async fn begin_cycle(&self, id: &str) -> Result<PageSession> {
        let session = self
            .get(id)
            .await?
            .ok_or_else(|| CozeError::SessionNotFound(id.to_string()))?;
        if session.state.is_loading {
            return Err(CozeError::SessionBusy(id.to_string()));
        }
        let mut marked = session.clone();
        marked.state.is_loading = true;
        self.save(marked).await?;
        Ok(session)
    }

    /// Store the settled session, but only while `token` is still current for
    /// the stored entry. A page deleted mid-cycle stays deleted.
    async fn finish_cycle(&self, session: PageSession, token: &GenerationToken) -> Result<()> {
        let current = self.get(&session.id).await?;
        match current {
            Some(stored) if token.is_current() && token.belongs_to(&stored.generation) => {
                self.save(session).await
            }
            _ => Err(CozeError::SessionNotFound(session.id)),
        }
    }

    /// Drop the loading mark of a cycle that ended without settling.
    async fn release_cycle(&self, id: &str) -> Result<()> {
        if let Some(mut session) = self.get(id).await? {
            session.state.is_loading = false;
            session.updated_at = Utc::now();
            self.save(session).await?;
        }
        Ok(())
    }
}

/// In-memory implementation of SessionStorage
#[derive(Clone, Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, PageSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: PageSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PageSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.generation.bump();
        }
        Ok(())
    }

    async fn begin_cycle(&self, id: &str) -> Result<PageSession> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| CozeError::SessionNotFound(id.to_string()))?;
        if entry.state.is_loading {
            return Err(CozeError::SessionBusy(id.to_string()));
        }
        let before = entry.clone();
        entry.state.is_loading = true;
        entry.updated_at = Utc::now();
        Ok(before)
    }

    async fn finish_cycle(&self, session: PageSession, token: &GenerationToken) -> Result<()> {
        // Holding the entry lock keeps a concurrent delete out until the write lands
        match self.sessions.get_mut(&session.id) {
            Some(mut entry) if token.is_current() && token.belongs_to(&entry.generation) => {
                *entry = session;
                Ok(())
            }
            _ => Err(CozeError::SessionNotFound(session.id)),
        }
    }

    async fn release_cycle(&self, id: &str) -> Result<()> {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.state.is_loading = false;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_delete() {
        let storage = InMemorySessionStorage::new();
        let session = PageSession::with_id("page-1");
        storage.save(session).await.unwrap();

        assert!(storage.get("page-1").await.unwrap().is_some());
        storage.delete("page-1").await.unwrap();
        assert!(storage.get("page-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_invalidates_in_flight_tokens() {
        let storage = InMemorySessionStorage::new();
        let session = PageSession::with_id("page-1");
        let token = session.generation.token();
        storage.save(session).await.unwrap();

        storage.delete("page-1").await.unwrap();

        assert!(token.is_stale());
    }

    #[tokio::test]
    async fn second_cycle_is_refused_while_loading() {
        let storage = InMemorySessionStorage::new();
        storage.save(PageSession::with_id("page-1")).await.unwrap();

        let before = storage.begin_cycle("page-1").await.unwrap();
        assert!(!before.state.is_loading);
        assert!(storage.get("page-1").await.unwrap().unwrap().state.is_loading);

        let err = storage.begin_cycle("page-1").await.unwrap_err();
        assert!(matches!(err, CozeError::SessionBusy(_)));
    }

    #[tokio::test]
    async fn begin_cycle_on_unknown_session() {
        let storage = InMemorySessionStorage::new();
        let err = storage.begin_cycle("missing").await.unwrap_err();
        assert!(matches!(err, CozeError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn finish_cycle_does_not_resurrect_a_deleted_page() {
        let storage = InMemorySessionStorage::new();
        storage.save(PageSession::with_id("page-1")).await.unwrap();
        let claimed = storage.begin_cycle("page-1").await.unwrap();
        let token = claimed.generation.token();

        storage.delete("page-1").await.unwrap();
        let err = storage.finish_cycle(claimed, &token).await.unwrap_err();

        assert!(matches!(err, CozeError::SessionNotFound(_)));
        assert!(storage.get("page-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finish_cycle_leaves_a_reopened_page_alone() {
        let storage = InMemorySessionStorage::new();
        storage.save(PageSession::with_id("page-1")).await.unwrap();
        let mut claimed = storage.begin_cycle("page-1").await.unwrap();
        let token = claimed.generation.token();

        storage.delete("page-1").await.unwrap();
        storage.save(PageSession::with_id("page-1")).await.unwrap();

        claimed.state.prompt = "stale prompt".to_string();
        assert!(storage.finish_cycle(claimed, &token).await.is_err());
        let reopened = storage.get("page-1").await.unwrap().unwrap();
        assert!(reopened.state.prompt.is_empty());
    }

    #[tokio::test]
    async fn finish_cycle_stores_the_settled_page() {
        let storage = InMemorySessionStorage::new();
        storage.save(PageSession::with_id("page-1")).await.unwrap();
        let mut claimed = storage.begin_cycle("page-1").await.unwrap();
        let token = claimed.generation.token();

        claimed.state.prompt = "a cat".to_string();
        storage.finish_cycle(claimed, &token).await.unwrap();

        let stored = storage.get("page-1").await.unwrap().unwrap();
        assert_eq!(stored.state.prompt, "a cat");
        assert!(!stored.state.is_loading);
    }

    #[tokio::test]
    async fn release_cycle_clears_the_loading_mark() {
        let storage = InMemorySessionStorage::new();
        storage.save(PageSession::with_id("page-1")).await.unwrap();
        storage.begin_cycle("page-1").await.unwrap();

        storage.release_cycle("page-1").await.unwrap();

        assert!(!storage.get("page-1").await.unwrap().unwrap().state.is_loading);
        storage.begin_cycle("page-1").await.unwrap();
    }
}
