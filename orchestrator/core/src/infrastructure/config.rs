// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Boot configuration (C12).
//!
//! Read once at process start from environment variables, the same way
//! the teacher's LLM provider registry resolves its API-key variables
//! (`infrastructure/llm/registry.rs`). Fails fast: a missing signing
//! secret or an out-of-range numeric override aborts startup rather than
//! falling back to an insecure default.

use thiserror::Error;

use crate::domain::execution::{MAX_HEAP_BYTES, MAX_TIMEOUT_MS};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8089";
const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_EXEC_MAX_HEAP_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_PAUSE_TTL_SECS: u64 = 900;
const DEFAULT_MAX_PAUSE_DURATION_SECS: u64 = 86_400;
const DEFAULT_REWRITE_CACHE_CAPACITY: usize = 1_024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value} ({reason})")]
    Invalid { name: &'static str, value: String, reason: String },
}

/// Process-wide settings resolved once at startup and threaded through to
/// every component that needs them (§4.10 External Interfaces / §2
/// Supplement).
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub bind_addr: String,
    pub signing_secret: Vec<u8>,
    pub provenance_secret: Vec<u8>,
    pub exec_timeout_ms: u64,
    pub exec_max_heap_bytes: u64,
    pub pause_ttl_secs: u64,
    pub max_pause_duration_secs: u64,
    pub rewrite_cache_capacity: usize,
}

impl BootConfig {
    /// Reads every setting from the environment, applying the documented
    /// defaults for optional overrides and failing on the first invalid
    /// or missing required value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let signing_secret = read_required_secret("ATP_SIGNING_SECRET")?;
        let provenance_secret = read_required_secret("ATP_PROVENANCE_SECRET")?;

        let bind_addr = std::env::var("ATP_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let exec_timeout_ms = read_bounded_u64("ATP_EXEC_TIMEOUT_MS", DEFAULT_EXEC_TIMEOUT_MS, 1, MAX_TIMEOUT_MS)?;
        let exec_max_heap_bytes =
            read_bounded_u64("ATP_EXEC_MAX_HEAP_BYTES", DEFAULT_EXEC_MAX_HEAP_BYTES, 1, MAX_HEAP_BYTES)?;
        let pause_ttl_secs = read_bounded_u64("ATP_PAUSE_TTL_SECS", DEFAULT_PAUSE_TTL_SECS, 1, u64::MAX)?;
        let max_pause_duration_secs =
            read_bounded_u64("ATP_MAX_PAUSE_DURATION_SECS", DEFAULT_MAX_PAUSE_DURATION_SECS, 1, u64::MAX)?;

        if max_pause_duration_secs < pause_ttl_secs {
            return Err(ConfigError::Invalid {
                name: "ATP_MAX_PAUSE_DURATION_SECS",
                value: max_pause_duration_secs.to_string(),
                reason: "must be >= ATP_PAUSE_TTL_SECS".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            signing_secret,
            provenance_secret,
            exec_timeout_ms,
            exec_max_heap_bytes,
            pause_ttl_secs,
            max_pause_duration_secs,
            rewrite_cache_capacity: DEFAULT_REWRITE_CACHE_CAPACITY,
        })
    }
}

fn read_required_secret(name: &'static str) -> Result<Vec<u8>, ConfigError> {
    let value = std::env::var(name).map_err(|_| ConfigError::Missing(name))?;
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid { name, value, reason: "must not be empty".to_string() });
    }
    Ok(value.into_bytes())
}

fn read_bounded_u64(name: &'static str, default: u64, min: u64, max: u64) -> Result<u64, ConfigError> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(default);
    };
    let parsed: u64 = raw
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value: raw.clone(), reason: "not a valid integer".to_string() })?;
    if parsed < min || parsed > max {
        return Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: format!("must be in {min}..={max}"),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "ATP_SIGNING_SECRET",
            "ATP_PROVENANCE_SECRET",
            "ATP_BIND_ADDR",
            "ATP_EXEC_TIMEOUT_MS",
            "ATP_EXEC_MAX_HEAP_BYTES",
            "ATP_PAUSE_TTL_SECS",
            "ATP_MAX_PAUSE_DURATION_SECS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_missing_signing_secret_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        assert!(matches!(BootConfig::from_env(), Err(ConfigError::Missing("ATP_SIGNING_SECRET"))));
    }

    #[test]
    fn test_defaults_applied_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("ATP_SIGNING_SECRET", "s1");
        std::env::set_var("ATP_PROVENANCE_SECRET", "s2");
        let cfg = BootConfig::from_env().unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(cfg.exec_timeout_ms, DEFAULT_EXEC_TIMEOUT_MS);
        clear_env();
    }

    #[test]
    fn test_timeout_override_above_ceiling_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("ATP_SIGNING_SECRET", "s1");
        std::env::set_var("ATP_PROVENANCE_SECRET", "s2");
        std::env::set_var("ATP_EXEC_TIMEOUT_MS", (MAX_TIMEOUT_MS + 1).to_string());
        assert!(BootConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_max_pause_duration_below_ttl_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("ATP_SIGNING_SECRET", "s1");
        std::env::set_var("ATP_PROVENANCE_SECRET", "s2");
        std::env::set_var("ATP_PAUSE_TTL_SECS", "100");
        std::env::set_var("ATP_MAX_PAUSE_DURATION_SECS", "50");
        assert!(BootConfig::from_env().is_err());
        clear_env();
    }
}
