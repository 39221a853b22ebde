// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Session domain model (BC-3 Session & Token Service).
//!
//! A [`Session`] is the durable record created by `POST /api/init` and
//! referenced by every subsequent authenticated call via its [`ClientId`].
//! Token issuance and verification live in the application layer
//! ([`crate::application::session_service`]); this module owns only the
//! shape of the session and its tenant identity.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque, cryptographically-random tenant identity: 16 random bytes,
/// hex-encoded, prefixed `cli_`. Doubles as the cache-partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub [u8; 16]);

impl ClientId {
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_str(&self) -> String {
        format!("cli_{}", hex::encode(self.0))
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClientId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix("cli_")
            .ok_or_else(|| SessionError::MalformedClientId(s.to_string()))?;
        let bytes = hex::decode(hex_part).map_err(|_| SessionError::MalformedClientId(s.to_string()))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| SessionError::MalformedClientId(s.to_string()))?;
        Ok(Self(arr))
    }
}

/// Client-supplied descriptive metadata passed at `init`, echoed back by
/// `/api/info` and stored for diagnostic purposes only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A client-resident tool descriptor registered at `init`: it is served by
/// the client itself rather than by the server's catalog, so calls to it
/// are always pausing calls (see [`crate::domain::execution::CallbackKind::Tool`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientResidentTool {
    pub name: String,
    pub group: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub client_id: ClientId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub client_info: ClientInfo,
    pub guidance: Option<String>,
    pub tools: Vec<ClientResidentTool>,
    /// Credential scopes granted to this client, consulted by the catalog's
    /// per-user scope filter (§4.7). Empty means "public tools only".
    #[serde(default)]
    pub scopes: Vec<String>,
}

pub const SESSION_TTL_HOURS: i64 = 12;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed client id: {0}")]
    MalformedClientId(String),
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("client id does not match session owner")]
    Forbidden,
}

impl Session {
    pub fn new(client_info: ClientInfo, guidance: Option<String>, tools: Vec<ClientResidentTool>) -> Self {
        let now = Utc::now();
        Self {
            client_id: ClientId::new(),
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
            client_info,
            guidance,
            tools,
            scopes: Vec::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn assert_owner(&self, candidate: ClientId) -> Result<(), SessionError> {
        if self.client_id != candidate {
            return Err(SessionError::Forbidden);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_round_trips_through_display_and_parse() {
        let id = ClientId::new();
        let parsed: ClientId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_client_id_rejects_missing_prefix() {
        assert!("deadbeef".parse::<ClientId>().is_err());
    }

    #[test]
    fn test_client_ids_are_random() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn test_session_not_expired_when_fresh() {
        let session = Session::new(ClientInfo::default(), None, vec![]);
        assert!(!session.is_expired());
    }

    #[test]
    fn test_session_owner_check() {
        let session = Session::new(ClientInfo::default(), None, vec![]);
        assert!(session.assert_owner(session.client_id).is_ok());
        assert!(matches!(
            session.assert_owner(ClientId::new()),
            Err(SessionError::Forbidden)
        ));
    }
}
