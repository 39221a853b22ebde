// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Provenance Registry (C1) domain model — best-effort taint tracking.
//!
//! Grounded on the teacher's `domain::security_context` value-object style:
//! a small set of declarative types evaluated by a pure function, here
//! generalised from "tool call vs capability allowlist" to "value vs
//! labelled source". See [`crate::application::policy_engine`] for the
//! predicate evaluation this registry feeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Where a value ultimately came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Tool,
    Llm,
    User,
    System,
}

/// Who may observe a labelled value downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readers {
    Public,
    Restricted(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceSource {
    pub kind: SourceKind,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Metadata attached to one labelled value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceMetadata {
    pub id: String,
    pub source: ProvenanceSource,
    pub readers: Readers,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

impl ProvenanceMetadata {
    pub fn is_tool_sourced(&self) -> bool {
        self.source.kind == SourceKind::Tool
    }

    pub fn is_user_sourced(&self) -> bool {
        self.source.kind == SourceKind::User
    }
}

/// Canonical content digest for a primitive value, used to recognise the
/// same primitive after it has round-tripped through JSON (e.g. across an
/// HTTP response boundary and back in via `provenanceHints`).
pub fn digest_primitive(value: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// Per-execution provenance state. Object-identity labels are keyed by a
/// synthetic registry id minted on `mark`; primitive labels are keyed by
/// content digest so a value surviving a round-trip through a plain string
/// or number still resolves to its source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceRegistry {
    by_id: HashMap<String, ProvenanceMetadata>,
    by_digest: HashMap<String, ProvenanceMetadata>,
    next_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceSnapshot {
    pub registry: Vec<(String, ProvenanceMetadata)>,
    pub primitives: Vec<(String, ProvenanceMetadata)>,
}

impl ProvenanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label an object-identity value, returning the minted registry id.
    pub fn mark(&mut self, source: ProvenanceSource, readers: Readers, dependencies: Vec<String>) -> String {
        let id = format!("prov_{}", self.next_id);
        self.next_id += 1;
        let metadata = ProvenanceMetadata {
            id: id.clone(),
            source,
            readers,
            dependencies,
            context: None,
        };
        self.by_id.insert(id.clone(), metadata);
        id
    }

    pub fn lookup(&self, id: &str) -> Option<&ProvenanceMetadata> {
        self.by_id.get(id)
    }

    /// Label a primitive by content digest ("taint set" entry, keyed
    /// `"tainted:<digest>"` as the spec's wire format expects).
    pub fn mark_tainted(&mut self, value: &serde_json::Value, source: ProvenanceSource, readers: Readers) -> String {
        let digest = digest_primitive(value);
        let key = format!("tainted:{digest}");
        let id = format!("prov_{}", self.next_id);
        self.next_id += 1;
        let metadata = ProvenanceMetadata {
            id,
            source,
            readers,
            dependencies: Vec::new(),
            context: None,
        };
        self.by_digest.insert(key, metadata);
        digest
    }

    pub fn lookup_primitive(&self, value: &serde_json::Value) -> Option<&ProvenanceMetadata> {
        let digest = digest_primitive(value);
        self.by_digest.get(&format!("tainted:{digest}"))
    }

    /// Pre-populate the taint map from `provenanceHints` submitted with a
    /// new execution, so data carried across an HTTP boundary remains
    /// labelled (§4.6 Hints mechanism).
    pub fn apply_hints(&mut self, hints: Vec<(String, ProvenanceMetadata)>) {
        for (digest, metadata) in hints {
            self.by_digest.insert(format!("tainted:{digest}"), metadata);
        }
    }

    pub fn snapshot(&self) -> ProvenanceSnapshot {
        ProvenanceSnapshot {
            registry: self.by_id.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            primitives: self.by_digest.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn restore(snapshot: ProvenanceSnapshot) -> Self {
        let mut registry = Self::default();
        for (id, meta) in snapshot.registry {
            registry.next_id = registry.next_id.max(registry.by_id.len() as u64 + 1);
            registry.by_id.insert(id, meta);
        }
        for (key, meta) in snapshot.primitives {
            registry.by_digest.insert(key, meta);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_source() -> ProvenanceSource {
        ProvenanceSource {
            kind: SourceKind::Tool,
            tool: Some("getSensitive".into()),
            operation: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_mark_and_lookup_roundtrip() {
        let mut registry = ProvenanceRegistry::new();
        let id = registry.mark(tool_source(), Readers::Public, vec![]);
        let meta = registry.lookup(&id).unwrap();
        assert!(meta.is_tool_sourced());
    }

    #[test]
    fn test_tainted_primitive_recognised_after_digest_roundtrip() {
        let mut registry = ProvenanceRegistry::new();
        let value = serde_json::json!("S");
        registry.mark_tainted(&value, tool_source(), Readers::Public);
        assert!(registry.lookup_primitive(&value).is_some());
        assert!(registry.lookup_primitive(&serde_json::json!("other")).is_none());
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut registry = ProvenanceRegistry::new();
        registry.mark(tool_source(), Readers::Public, vec![]);
        registry.mark_tainted(&serde_json::json!(42), tool_source(), Readers::Public);
        let snapshot = registry.snapshot();
        let restored = ProvenanceRegistry::restore(snapshot);
        assert!(restored.lookup_primitive(&serde_json::json!(42)).is_some());
    }

    #[test]
    fn test_hints_applied_as_tainted_primitives() {
        let mut registry = ProvenanceRegistry::new();
        let digest = digest_primitive(&serde_json::json!("secret value"));
        registry.apply_hints(vec![(digest, ProvenanceMetadata {
            id: "prov_hint".into(),
            source: tool_source(),
            readers: Readers::Public,
            dependencies: vec![],
            context: None,
        })]);
        assert!(registry.lookup_primitive(&serde_json::json!("secret value")).is_some());
    }
}
