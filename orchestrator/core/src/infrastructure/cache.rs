// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory [`CacheBackend`] (C5) — a `dashmap` table keyed by the
//! already-tenant-prefixed key, with a lazily-swept per-entry TTL. This is
//! the reference backend named in §4.8; a Redis-backed one is a drop-in
//! replacement behind the same trait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::cache::{CacheBackend, CacheError};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct InMemoryCacheBackend {
    entries: Arc<DashMap<String, Entry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: Option<u64>) -> Result<(), CacheError> {
        let expires_at = ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false))
    }

    async fn clear(&self, prefix: &str) -> Result<(), CacheError> {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let backend = InMemoryCacheBackend::new();
        backend.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let backend = InMemoryCacheBackend::new();
        backend.set("k", b"v".to_vec(), Some(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(!backend.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_removes_only_matching_prefix() {
        let backend = InMemoryCacheBackend::new();
        backend.set("tenant:a:k", b"1".to_vec(), None).await.unwrap();
        backend.set("tenant:b:k", b"2".to_vec(), None).await.unwrap();
        backend.clear("tenant:a:").await.unwrap();
        assert_eq!(backend.get("tenant:a:k").await.unwrap(), None);
        assert_eq!(backend.get("tenant:b:k").await.unwrap(), Some(b"2".to_vec()));
    }
}
