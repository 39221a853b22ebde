// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cache API (C5) application service — the tenant-scoping facade user
//! programs and C3/C4 call through. Never talks to a [`CacheBackend`]
//! without first prefixing the key via [`tenant_key`].

use std::sync::Arc;

use crate::domain::cache::{tenant_key, CacheBackend, CacheError};
use crate::domain::session::ClientId;

pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub async fn get(&self, client_id: &ClientId, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.backend.get(&tenant_key(client_id, key)).await
    }

    pub async fn set(&self, client_id: &ClientId, key: &str, value: Vec<u8>, ttl_secs: Option<u64>) -> Result<(), CacheError> {
        self.backend.set(&tenant_key(client_id, key), value, ttl_secs).await
    }

    pub async fn delete(&self, client_id: &ClientId, key: &str) -> Result<(), CacheError> {
        self.backend.delete(&tenant_key(client_id, key)).await
    }

    /// Distinguishes "no entry" from "entry storing an explicit null" —
    /// `get` alone cannot, since a stored JSON `null` serialises to bytes
    /// too (§4.8: "returns *nothing* (distinguishable from a stored null
    /// via `has`)").
    pub async fn has(&self, client_id: &ClientId, key: &str) -> Result<bool, CacheError> {
        self.backend.has(&tenant_key(client_id, key)).await
    }

    pub async fn clear_tenant(&self, client_id: &ClientId) -> Result<(), CacheError> {
        self.backend.clear(&format!("tenant:{client_id}:")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn test_tenant_isolation() {
        let service = CacheService::new(Arc::new(InMemoryCacheBackend::new()));
        let x = ClientId::new();
        let y = ClientId::new();

        service.set(&x, "k", b"alpha".to_vec(), None).await.unwrap();
        service.set(&y, "k", b"beta".to_vec(), None).await.unwrap();

        assert_eq!(service.get(&x, "k").await.unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(service.get(&y, "k").await.unwrap(), Some(b"beta".to_vec()));

        service.delete(&x, "k").await.unwrap();
        assert_eq!(service.get(&x, "k").await.unwrap(), None);
        assert_eq!(service.get(&y, "k").await.unwrap(), Some(b"beta".to_vec()));
    }

    #[tokio::test]
    async fn test_has_distinguishes_missing_from_stored_null() {
        let service = CacheService::new(Arc::new(InMemoryCacheBackend::new()));
        let client = ClientId::new();
        assert!(!service.has(&client, "k").await.unwrap());
        service.set(&client, "k", b"null".to_vec(), None).await.unwrap();
        assert!(service.has(&client, "k").await.unwrap());
    }
}
