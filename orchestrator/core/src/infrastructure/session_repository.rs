// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! [`SessionRepository`] (C3) over the [`CacheBackend`] port (C5), mirroring
//! the teacher's in-memory repositories (`infrastructure/repositories.rs`)
//! but storing serialized records rather than holding domain structs
//! directly, since sessions share the same tenant cache C4 uses.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::cache::CacheBackend;
use crate::domain::repository::{RepositoryError, SessionRepository};
use crate::domain::session::{ClientId, Session};

const SESSION_KEY_PREFIX: &str = "session:";

fn key_for(id: ClientId) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

pub struct InMemorySessionRepository {
    backend: Arc<dyn CacheBackend>,
}

impl InMemorySessionRepository {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let ttl_secs = (session.expires_at - Utc::now()).num_seconds().max(0) as u64;
        let bytes = serde_json::to_vec(session)?;
        self.backend.set(&key_for(session.client_id), bytes, Some(ttl_secs)).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: ClientId) -> Result<Option<Session>, RepositoryError> {
        match self.backend.get(&key_for(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: ClientId) -> Result<(), RepositoryError> {
        self.backend.delete(&key_for(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::ClientInfo;
    use crate::infrastructure::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn test_save_then_find_round_trips() {
        let repo = InMemorySessionRepository::new(Arc::new(InMemoryCacheBackend::new()));
        let session = Session::new(ClientInfo::default(), None, vec![]);
        repo.save(&session).await.unwrap();
        let found = repo.find_by_id(session.client_id).await.unwrap().unwrap();
        assert_eq!(found.client_id, session.client_id);
    }

    #[tokio::test]
    async fn test_find_missing_returns_none() {
        let repo = InMemorySessionRepository::new(Arc::new(InMemoryCacheBackend::new()));
        assert!(repo.find_by_id(ClientId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_session() {
        let repo = InMemorySessionRepository::new(Arc::new(InMemoryCacheBackend::new()));
        let session = Session::new(ClientInfo::default(), None, vec![]);
        repo.save(&session).await.unwrap();
        repo.delete(session.client_id).await.unwrap();
        assert!(repo.find_by_id(session.client_id).await.unwrap().is_none());
    }
}
