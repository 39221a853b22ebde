// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! [`PausedStateRepository`] (C4) over the [`CacheBackend`] port (C5).
//!
//! Implements the two-clock eviction policy from §4.2: a *sliding* TTL that
//! refreshes on every `get`/`save` (so an execution a client keeps
//! resuming never expires mid-conversation) bounded by an *absolute*
//! `maxPauseDuration` measured from the execution's first pause, which
//! sliding refresh can never extend past.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cache::CacheBackend;
use crate::domain::execution::{ExecutionId, ExecutionRecord};
use crate::domain::repository::{PausedStateRepository, RepositoryError};

const PAUSED_KEY_PREFIX: &str = "paused:";

fn key_for(id: ExecutionId) -> String {
    format!("{PAUSED_KEY_PREFIX}{id}")
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    record: ExecutionRecord,
    first_paused_at: DateTime<Utc>,
}

pub struct CachePausedStateRepository {
    backend: Arc<dyn CacheBackend>,
    pause_ttl_secs: u64,
    max_pause_duration_secs: u64,
}

impl CachePausedStateRepository {
    pub fn new(backend: Arc<dyn CacheBackend>, pause_ttl_secs: u64, max_pause_duration_secs: u64) -> Self {
        Self { backend, pause_ttl_secs, max_pause_duration_secs }
    }

    fn sliding_ttl_for(&self, first_paused_at: DateTime<Utc>) -> u64 {
        let elapsed = (Utc::now() - first_paused_at).num_seconds().max(0) as u64;
        let remaining_to_ceiling = self.max_pause_duration_secs.saturating_sub(elapsed);
        self.pause_ttl_secs.min(remaining_to_ceiling)
    }
}

#[async_trait]
impl PausedStateRepository for CachePausedStateRepository {
    async fn save(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let key = key_for(record.execution_id);
        let first_paused_at = match self.backend.get(&key).await? {
            Some(bytes) => serde_json::from_slice::<Envelope>(&bytes)?.first_paused_at,
            None => record.paused_at,
        };

        let elapsed = (Utc::now() - first_paused_at).num_seconds().max(0) as u64;
        if elapsed > self.max_pause_duration_secs {
            self.backend.delete(&key).await?;
            return Err(RepositoryError::NotFound(format!(
                "execution {} exceeded its maximum pause duration",
                record.execution_id
            )));
        }

        let envelope = Envelope { record: record.clone(), first_paused_at };
        let bytes = serde_json::to_vec(&envelope)?;
        let ttl = self.sliding_ttl_for(first_paused_at);
        self.backend.set(&key, bytes, Some(ttl)).await?;
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let key = key_for(id);
        let Some(bytes) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let envelope: Envelope = serde_json::from_slice(&bytes)?;

        let elapsed = (Utc::now() - envelope.first_paused_at).num_seconds().max(0) as u64;
        if elapsed > self.max_pause_duration_secs {
            self.backend.delete(&key).await?;
            return Ok(None);
        }

        // Sliding refresh: touching a paused execution resets its TTL
        // window without moving the absolute ceiling.
        let ttl = self.sliding_ttl_for(envelope.first_paused_at);
        let refreshed = serde_json::to_vec(&envelope)?;
        self.backend.set(&key, refreshed, Some(ttl)).await?;

        Ok(Some(envelope.record))
    }

    async fn delete(&self, id: ExecutionId) -> Result<(), RepositoryError> {
        self.backend.delete(&key_for(id)).await?;
        Ok(())
    }
}
