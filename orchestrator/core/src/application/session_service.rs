// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Session & Token Service (C3).
//!
//! Grounded on the teacher's `AttestationServiceImpl` (resolve identity →
//! issue token → persist session) and `infrastructure::smcp::signature`
//! (`jsonwebtoken` verify with a single pinned algorithm) — generalised from
//! RS256/PEM attestation tokens to a symmetric HS256 session token with
//! sliding rotation, matching §4.1.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::repository::{RepositoryError, SessionRepository};
use crate::domain::session::{ClientId, ClientInfo, ClientResidentTool, Session, SessionError};

#[derive(Debug, Error)]
pub enum SessionServiceError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden")]
    Forbidden,
}

/// Claims embedded in every session token. `jti` distinguishes a token from
/// its rotated successor so a revoked token can't be confused with a fresh
/// one sharing the same `clientId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub kind: String,
    pub jti: Uuid,
    pub exp: i64,
}

pub const TOKEN_TTL_MINUTES: i64 = 30;

pub struct InitResult {
    pub client_id: ClientId,
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
    pub rotate_at: chrono::DateTime<Utc>,
}

pub struct RotatedToken {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

#[async_trait]
pub trait SessionService: Send + Sync {
    async fn init_client(
        &self,
        client_info: ClientInfo,
        guidance: Option<String>,
        tools: Vec<ClientResidentTool>,
    ) -> Result<InitResult, SessionServiceError>;

    /// Verifies `token` was issued for `client_id` under the pinned
    /// algorithm, and that the session has neither expired nor been
    /// revoked. Returns a freshly rotated token on every successful call
    /// (§4.1 Rotation).
    async fn verify(&self, client_id: ClientId, token: &str) -> Result<RotatedToken, SessionServiceError>;

    async fn revoke(&self, client_id: ClientId) -> Result<(), SessionServiceError>;

    async fn get_session(&self, client_id: ClientId) -> Result<Session, SessionServiceError>;
}

pub struct StandardSessionService {
    repository: Arc<dyn SessionRepository>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl StandardSessionService {
    pub fn new(repository: Arc<dyn SessionRepository>, signing_secret: &[u8]) -> Self {
        Self {
            repository,
            encoding_key: EncodingKey::from_secret(signing_secret),
            decoding_key: DecodingKey::from_secret(signing_secret),
        }
    }

    fn issue_token(&self, client_id: ClientId) -> Result<(String, chrono::DateTime<Utc>), SessionServiceError> {
        let expires_at = Utc::now() + Duration::minutes(TOKEN_TTL_MINUTES);
        let claims = SessionClaims {
            sub: client_id.to_string(),
            kind: "client".to_string(),
            jti: Uuid::new_v4(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(jsonwebtoken::Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionServiceError::Unauthorized(e.to_string()))?;
        Ok((token, expires_at))
    }
}

#[async_trait]
impl SessionService for StandardSessionService {
    async fn init_client(
        &self,
        client_info: ClientInfo,
        guidance: Option<String>,
        tools: Vec<ClientResidentTool>,
    ) -> Result<InitResult, SessionServiceError> {
        let session = Session::new(client_info, guidance, tools);
        let client_id = session.client_id;
        self.repository.save(&session).await?;

        let (token, expires_at) = self.issue_token(client_id)?;
        let rotate_at = expires_at - Duration::minutes(TOKEN_TTL_MINUTES / 3);
        Ok(InitResult {
            client_id,
            token,
            expires_at,
            rotate_at,
        })
    }

    async fn verify(&self, client_id: ClientId, token: &str) -> Result<RotatedToken, SessionServiceError> {
        // Pin the accepted algorithm set to exactly HS256: an attacker
        // cannot downgrade to `none` or resubmit a token signed under a
        // different algorithm the server also happens to recognise.
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];
        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| SessionServiceError::Unauthorized(e.to_string()))?;

        if data.claims.sub != client_id.to_string() {
            return Err(SessionServiceError::Forbidden);
        }

        let session = self
            .repository
            .find_by_id(client_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if session.is_expired() {
            return Err(SessionServiceError::Unauthorized("session expired".into()));
        }

        let (fresh_token, expires_at) = self.issue_token(client_id)?;
        Ok(RotatedToken {
            token: fresh_token,
            expires_at,
        })
    }

    async fn revoke(&self, client_id: ClientId) -> Result<(), SessionServiceError> {
        self.repository.delete(client_id).await?;
        Ok(())
    }

    async fn get_session(&self, client_id: ClientId) -> Result<Session, SessionServiceError> {
        self.repository
            .find_by_id(client_id)
            .await?
            .ok_or_else(|| SessionServiceError::Session(SessionError::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryCacheBackend;
    use crate::infrastructure::session_repository::InMemorySessionRepository;

    fn service() -> StandardSessionService {
        StandardSessionService::new(
            Arc::new(InMemorySessionRepository::new(Arc::new(InMemoryCacheBackend::new()))),
            b"test-signing-secret-at-least-32-bytes-long",
        )
    }

    #[tokio::test]
    async fn test_init_then_verify_succeeds() {
        let svc = service();
        let init = svc.init_client(ClientInfo::default(), None, vec![]).await.unwrap();
        let rotated = svc.verify(init.client_id, &init.token).await.unwrap();
        assert!(!rotated.token.is_empty());
        assert_ne!(rotated.token, init.token);
    }

    #[tokio::test]
    async fn test_verify_rejects_mismatched_client_id() {
        let svc = service();
        let init = svc.init_client(ClientInfo::default(), None, vec![]).await.unwrap();
        let other = ClientId::new();
        assert!(matches!(
            svc.verify(other, &init.token).await,
            Err(SessionServiceError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_unknown_session() {
        let svc = service();
        let fake_client = ClientId::new();
        let (token, _) = svc.issue_token(fake_client).unwrap();
        assert!(svc.verify(fake_client, &token).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_invalidates_session() {
        let svc = service();
        let init = svc.init_client(ClientInfo::default(), None, vec![]).await.unwrap();
        svc.revoke(init.client_id).await.unwrap();
        assert!(svc.verify(init.client_id, &init.token).await.is_err());
    }
}
