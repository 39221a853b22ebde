// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cache API (C5) domain model.
//!
//! Keys reaching a [`CacheBackend`] are always tenant-prefixed by the Core
//! before the backend ever sees them, so backend implementations need no
//! tenant awareness of their own. Concrete backends (Redis, file) are out of
//! scope (§1); this crate defines the port and ships exactly one reference
//! implementation, [`crate::infrastructure::cache::InMemoryCacheBackend`].

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Pluggable storage behind the tenant-scoped cache facade (C5) and, by
/// extension, the Paused-State Store (C4) and Session Service (C3).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: Option<u64>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn has(&self, key: &str) -> Result<bool, CacheError>;
    /// Delete every key starting with `prefix` (used for tenant-wide clear).
    async fn clear(&self, prefix: &str) -> Result<(), CacheError>;
}

/// Prefixes a logical key with the tenant's `clientId`, per §3 Cache entry:
/// "every key is prefixed with `tenant:<clientId>:` before reaching a
/// backend".
pub fn tenant_key(client_id: &crate::domain::session::ClientId, key: &str) -> String {
    format!("tenant:{client_id}:{key}")
}

pub fn execution_key(execution_id: &crate::domain::execution::ExecutionId) -> String {
    format!("execution:{execution_id}")
}

pub fn session_key(client_id: &crate::domain::session::ClientId) -> String {
    format!("session:{client_id}")
}

pub fn checkpoint_key(execution_id: &crate::domain::execution::ExecutionId, loop_id: &str) -> String {
    format!("checkpoint:{execution_id}:{loop_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::ClientId;

    #[test]
    fn test_tenant_key_is_namespaced_per_client() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(tenant_key(&a, "k"), tenant_key(&b, "k"));
    }

    #[test]
    fn test_tenant_key_format() {
        let client = ClientId::new();
        let key = tenant_key(&client, "foo");
        assert!(key.starts_with("tenant:cli_"));
        assert!(key.ends_with(":foo"));
    }
}
