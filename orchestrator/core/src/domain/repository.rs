// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository ports for the two aggregates the Pausable Execution Core
//! persists: paused executions (C4) and sessions (C3). Concrete
//! implementations live in `infrastructure/` and are built over the
//! [`crate::domain::cache::CacheBackend`] port, following the teacher's
//! separation between a repository trait (domain) and its storage
//! backend (infrastructure).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::execution::{ExecutionId, ExecutionRecord};
use crate::domain::session::{ClientId, Session};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("entity not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<crate::domain::cache::CacheError> for RepositoryError {
    fn from(err: crate::domain::cache::CacheError) -> Self {
        RepositoryError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Durable mapping from execution id to paused-program record (C4).
/// `get` implements the sliding-TTL refresh and the absolute
/// `maxPauseDuration` eviction described in §4.2; callers never talk to the
/// cache backend directly.
#[async_trait]
pub trait PausedStateRepository: Send + Sync {
    async fn save(&self, record: &ExecutionRecord) -> Result<(), RepositoryError>;
    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, RepositoryError>;
    async fn delete(&self, id: ExecutionId) -> Result<(), RepositoryError>;
}

/// Session persistence (C3). Sessions are small enough and short-lived
/// enough that the same cache-backed store as C4 can host them; a separate
/// trait keeps the two aggregates independently swappable.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: ClientId) -> Result<Option<Session>, RepositoryError>;
    async fn delete(&self, id: ClientId) -> Result<(), RepositoryError>;
}
