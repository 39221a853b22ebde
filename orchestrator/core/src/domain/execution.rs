// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pausable Execution Core domain model.
//!
//! An [`ExecutionRecord`] is the durable representation of one in-flight run
//! of a rewritten guest program. It does not model an iterative agent loop;
//! it models a single sandboxed program that may suspend any number of times
//! at a pausing call and later resume from the same logical point by
//! replaying previously recorded callback results against a fresh
//! interpretation of its (fixed) source text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::session::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The namespace a pausing call belongs to, mirroring the rewriter's view of
/// `atp.llm` / `atp.approval` / `atp.embedding` calls and client-resident
/// `api.<group>.*` tool calls. `Batch` marks a record that bundles several
/// independent pausing calls from one parallel join into a single pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallbackKind {
    Llm,
    Approval,
    Embedding,
    Tool,
    Batch,
}

/// One entry in an execution's replay log. `result = None` marks the record
/// that caused the current pause; every earlier entry carries a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub sequence: u64,
    pub kind: CallbackKind,
    pub operation: String,
    pub payload: Value,
    pub result: Option<Value>,
}

impl CallbackRecord {
    /// Whether this record describes the same pausing call as the given
    /// fingerprint. Used to detect non-deterministic replay: if a rerun
    /// reaches sequence N with a different kind/operation/payload than what
    /// was recorded, the program diverged from its earlier run.
    pub fn fingerprint_matches(&self, kind: CallbackKind, operation: &str, payload: &Value) -> bool {
        self.kind == kind && self.operation == operation && &self.payload == payload
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceMode {
    None,
    Proxy,
    Ast,
}

impl Default for ProvenanceMode {
    fn default() -> Self {
        ProvenanceMode::Proxy
    }
}

pub const MAX_TIMEOUT_MS: u64 = 300_000;
pub const MAX_HEAP_BYTES: u64 = 512 * 1024 * 1024;

/// Per-execution resource and behaviour limits. Unset fields fall back to
/// the boot configuration defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_heap_bytes: Option<u64>,
    #[serde(default)]
    pub max_llm_calls: Option<u32>,
    #[serde(default)]
    pub provenance_mode: Option<ProvenanceMode>,
    #[serde(default)]
    pub enabled_groups: Option<Vec<String>>,
    #[serde(default)]
    pub client_resident_groups: Vec<String>,
    /// Tool groups treated as having external/exfiltration-capable reach by
    /// the Policy Engine's exfiltration check (§4.6), e.g.
    /// `["openapi.webhook", "mcp.email"]`. Supports the same `*.suffix` /
    /// `prefix.*` wildcard patterns `Policy::evaluate` matches against.
    #[serde(default)]
    pub external_groups: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_heap_bytes: None,
            max_llm_calls: None,
            provenance_mode: None,
            enabled_groups: None,
            client_resident_groups: Vec::new(),
            external_groups: Vec::new(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if let Some(t) = self.timeout_ms {
            if t == 0 || t > MAX_TIMEOUT_MS {
                return Err(ExecutionError::InvalidConfig(format!(
                    "timeout_ms must be in 1..={MAX_TIMEOUT_MS}, got {t}"
                )));
            }
        }
        if let Some(h) = self.max_heap_bytes {
            if h == 0 || h > MAX_HEAP_BYTES {
                return Err(ExecutionError::InvalidConfig(format!(
                    "max_heap_bytes must be in 1..={MAX_HEAP_BYTES}, got {h}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Paused,
    Timeout,
    MemoryExceeded,
    LlmCallsExceeded,
    SecurityViolation,
    ParseError,
    NetworkError,
    LoopDetected,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Paused)
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid execution config: {0}")]
    InvalidConfig(String),
    #[error("execution {0} not found")]
    NotFound(ExecutionId),
    #[error("execution {0} is owned by a different client")]
    Forbidden(ExecutionId),
    #[error(
        "replay mismatch at sequence {sequence}: expected {expected_kind:?}/{expected_op}, got {actual_kind:?}/{actual_op}"
    )]
    ReplayMismatch {
        sequence: u64,
        expected_kind: CallbackKind,
        expected_op: String,
        actual_kind: CallbackKind,
        actual_op: String,
    },
    #[error("execution is not paused")]
    NotPaused,
}

/// The durable record of one execution. Owned by the Pausable Execution
/// Core; repositories persist and return it verbatim and must never mutate
/// it themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub client_id: ClientId,
    /// The rewritten program text. A resume re-runs this from the top; it
    /// is the rewritten checkpointed form produced once at `/api/execute`,
    /// not the program text the caller originally submitted.
    pub source: String,
    pub config: ExecutionConfig,
    pub callback_history: Vec<CallbackRecord>,
    pub current_index: usize,
    pub paused_at: DateTime<Utc>,
    pub provenance_snapshot: Option<crate::domain::provenance::ProvenanceSnapshot>,
    /// Wall-clock sandbox time and peak tracked heap usage across every run
    /// (initial + every resume) of this execution, surfaced as
    /// `ExecutionResultView.stats` (§6).
    #[serde(default)]
    pub total_duration_ms: u64,
    #[serde(default)]
    pub peak_memory_bytes: u64,
}

impl ExecutionRecord {
    pub fn new(client_id: ClientId, source: String, config: ExecutionConfig) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            client_id,
            source,
            config,
            callback_history: Vec::new(),
            current_index: 0,
            paused_at: Utc::now(),
            provenance_snapshot: None,
            total_duration_ms: 0,
            peak_memory_bytes: 0,
        }
    }

    /// Append the pausing call that caused this suspension and advance
    /// `current_index` to it. Returns the new record's sequence number.
    pub fn push_pending(&mut self, kind: CallbackKind, operation: String, payload: Value) -> u64 {
        let sequence = self.callback_history.len() as u64;
        self.callback_history.push(CallbackRecord {
            sequence,
            kind,
            operation,
            payload,
            result: None,
        });
        self.current_index = self.callback_history.len() - 1;
        self.paused_at = Utc::now();
        sequence
    }

    /// Resolve the most recent pending record with the client-supplied
    /// callback result, unblocking the next replay pass.
    pub fn resolve_pending(&mut self, result: Value) -> Result<(), ExecutionError> {
        let last = self
            .callback_history
            .last_mut()
            .ok_or(ExecutionError::NotPaused)?;
        if last.result.is_some() {
            return Err(ExecutionError::NotPaused);
        }
        last.result = Some(result);
        Ok(())
    }

    /// Every record before `current_index` must carry a result; the record
    /// at `current_index`, if any, carries one iff the execution is not
    /// currently paused.
    pub fn invariant_check(&self) -> bool {
        if self.callback_history.is_empty() {
            return self.current_index == 0;
        }
        self.callback_history[..self.current_index]
            .iter()
            .all(|r| r.result.is_some())
    }

    pub fn is_paused(&self) -> bool {
        self.callback_history
            .last()
            .map(|r| r.result.is_none())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientId {
        ClientId::new()
    }

    #[test]
    fn test_execution_id_new_unique() {
        let a = ExecutionId::new();
        let b = ExecutionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_execution_id_display() {
        let id = ExecutionId::new();
        assert_eq!(format!("{}", id), id.0.to_string());
    }

    #[test]
    fn test_new_record_has_no_history() {
        let rec = ExecutionRecord::new(client(), "return 1;".into(), ExecutionConfig::default());
        assert!(rec.callback_history.is_empty());
        assert!(!rec.is_paused());
        assert!(rec.invariant_check());
    }

    #[test]
    fn test_push_pending_then_resolve() {
        let mut rec = ExecutionRecord::new(client(), "src".into(), ExecutionConfig::default());
        let seq = rec.push_pending(CallbackKind::Llm, "llm.call".into(), serde_json::json!({"prompt": "A"}));
        assert_eq!(seq, 0);
        assert!(rec.is_paused());
        assert!(rec.invariant_check());

        rec.resolve_pending(serde_json::json!("A")).unwrap();
        assert!(!rec.is_paused());
        assert!(rec.invariant_check());
    }

    #[test]
    fn test_resolve_without_pending_errors() {
        let mut rec = ExecutionRecord::new(client(), "src".into(), ExecutionConfig::default());
        assert!(matches!(rec.resolve_pending(serde_json::json!(1)), Err(ExecutionError::NotPaused)));
    }

    #[test]
    fn test_resolve_twice_errors() {
        let mut rec = ExecutionRecord::new(client(), "src".into(), ExecutionConfig::default());
        rec.push_pending(CallbackKind::Approval, "approval.request".into(), serde_json::json!({}));
        rec.resolve_pending(serde_json::json!({"approved": true})).unwrap();
        assert!(matches!(rec.resolve_pending(serde_json::json!({})), Err(ExecutionError::NotPaused)));
    }

    #[test]
    fn test_config_validation_rejects_zero_and_over_ceiling() {
        let mut cfg = ExecutionConfig::default();
        cfg.timeout_ms = Some(0);
        assert!(cfg.validate().is_err());

        cfg.timeout_ms = Some(MAX_TIMEOUT_MS + 1);
        assert!(cfg.validate().is_err());

        cfg.timeout_ms = Some(1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_fingerprint_matches() {
        let rec = CallbackRecord {
            sequence: 0,
            kind: CallbackKind::Llm,
            operation: "llm.call".into(),
            payload: serde_json::json!({"prompt": "A"}),
            result: Some(serde_json::json!("A")),
        };
        assert!(rec.fingerprint_matches(CallbackKind::Llm, "llm.call", &serde_json::json!({"prompt": "A"})));
        assert!(!rec.fingerprint_matches(CallbackKind::Llm, "llm.call", &serde_json::json!({"prompt": "B"})));
        assert!(!rec.fingerprint_matches(CallbackKind::Approval, "llm.call", &serde_json::json!({"prompt": "A"})));
    }
}
