// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Program Rewriter (C6) domain model — the data shapes produced and
//! consumed by the rewrite pipeline, independent of the AST library used to
//! implement it (see [`crate::application::rewriter`] for the `boa_ast`
//! visitor).

use serde::{Deserialize, Serialize};

use crate::domain::execution::CallbackKind;

/// Stable identifier for one rewritten construct (a loop, a pausing call
/// site), derived from its textual position plus a per-execution salt so a
/// checkpoint saved by one run is found by a re-run of the same rewritten
/// source (§4.3 point 4).
pub fn stable_construct_id(execution_salt: &str, byte_offset: usize, node_kind: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(execution_salt.as_bytes());
    hasher.update(&byte_offset.to_le_bytes());
    hasher.update(node_kind.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest.as_bytes())[..16].to_string()
}

/// The wire shape of `needsCallback`: one pausing call awaiting a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCallback {
    pub id: uuid::Uuid,
    pub kind: CallbackKind,
    pub operation: String,
    pub payload: serde_json::Value,
}

/// Per-iteration record persisted to the cache so a rewritten loop can
/// resume at the next index after a pause, rather than re-running earlier
/// iterations (§4.3 point 2, GLOSSARY "Loop checkpoint").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopCheckpoint {
    pub loop_id: String,
    pub current_index: usize,
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    #[serde(default)]
    pub accumulator: Option<serde_json::Value>,
}

impl LoopCheckpoint {
    pub fn new(loop_id: String) -> Self {
        Self {
            loop_id,
            current_index: 0,
            results: Vec::new(),
            accumulator: None,
        }
    }

    pub fn record_iteration(&mut self, result: serde_json::Value) {
        self.results.push(result);
        self.current_index += 1;
    }
}

/// The maximum number of loop iterations the rewriter's runtime helper will
/// drive before failing with `loop_detected` (§4.3 point 2: "maximum-
/// iterations guard (≥10⁶)").
pub const MAX_LOOP_ITERATIONS: u64 = 1_000_000;

/// A construct the rewriter declines to make checkpoint-resumable because
/// its body assigns a free variable after a point where a pausing call
/// could suspend — such state cannot be restored by pure source replay
/// (§4.3, final paragraph). These fall through to the sequential
/// checkpointed path (the whole construct re-runs from its start on every
/// resume rather than resuming mid-body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsafeFreeVariableCapture {
    pub variable_name: String,
    pub byte_offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_construct_id_deterministic() {
        let a = stable_construct_id("salt-1", 42, "ForStatement");
        let b = stable_construct_id("salt-1", 42, "ForStatement");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_stable_construct_id_differs_by_salt() {
        let a = stable_construct_id("salt-1", 42, "ForStatement");
        let b = stable_construct_id("salt-2", 42, "ForStatement");
        assert_ne!(a, b);
    }

    #[test]
    fn test_stable_construct_id_differs_by_offset_and_kind() {
        let base = stable_construct_id("salt", 10, "ForStatement");
        assert_ne!(base, stable_construct_id("salt", 11, "ForStatement"));
        assert_ne!(base, stable_construct_id("salt", 10, "WhileStatement"));
    }

    #[test]
    fn test_loop_checkpoint_records_iterations_in_order() {
        let mut checkpoint = LoopCheckpoint::new("loop1".into());
        checkpoint.record_iteration(serde_json::json!("a"));
        checkpoint.record_iteration(serde_json::json!("b"));
        assert_eq!(checkpoint.current_index, 2);
        assert_eq!(checkpoint.results, vec![serde_json::json!("a"), serde_json::json!("b")]);
    }
}
