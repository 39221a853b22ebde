// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy Engine (C9) domain model.
//!
//! Grounded on the teacher's `domain::security_context::SecurityContext`:
//! an ordered list of declarative checks evaluated against a call, here
//! generalised from "tool call vs capability allowlist" to "tool call vs
//! provenance-label policy list". See [`crate::domain::provenance`] for the
//! label lookups a predicate consults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::provenance::{ProvenanceRegistry, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Read,
    Write,
    Destructive,
}

/// One call under policy evaluation: the tool being invoked and the
/// arguments it was invoked with, plus enough metadata to let a predicate
/// reason about destructiveness and group membership.
pub struct PolicyContext<'a> {
    pub tool_name: &'a str,
    pub tool_group: &'a str,
    pub operation_type: OperationType,
    pub args: &'a serde_json::Value,
    pub registry: &'a ProvenanceRegistry,
    /// Groups considered to have external/exfiltration-capable reach
    /// (configured per deployment, e.g. `["openapi.webhook", "mcp.email"]`).
    pub external_groups: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyDecision {
    Allow,
    Log,
    Block(String),
}

/// A single named policy. `predicate` is stored as a variant rather than a
/// boxed closure so policies stay serialisable and the two built-ins can be
/// constructed without runtime registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub description: String,
    pub kind: PolicyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Block a call into a configured external group when any argument
    /// carries a tool-sourced label (data exfiltration guard).
    Exfiltration,
    /// Block a destructive call unless some argument carries a user-origin
    /// label (prevents an LLM from authorising its own destructive action).
    UserOriginRequired,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

impl Policy {
    pub fn exfiltration() -> Self {
        Self {
            name: "exfiltration".to_string(),
            description: "blocks tool-sourced data flowing into an external group".to_string(),
            kind: PolicyKind::Exfiltration,
        }
    }

    pub fn user_origin_required() -> Self {
        Self {
            name: "user-origin-required".to_string(),
            description: "requires a user-origin argument for destructive tools".to_string(),
            kind: PolicyKind::UserOriginRequired,
        }
    }

    /// Evaluate this policy against a call. Values referenced by `ctx.args`
    /// are checked against the registry by primitive digest; object
    /// arguments are walked one level (tools accept flat JSON objects).
    pub fn evaluate(&self, ctx: &PolicyContext<'_>) -> PolicyDecision {
        match self.kind {
            PolicyKind::Exfiltration => {
                let is_external = ctx
                    .external_groups
                    .iter()
                    .any(|g| matches_pattern(g, ctx.tool_group));
                if !is_external {
                    return PolicyDecision::Allow;
                }
                if any_arg_matches(ctx.args, ctx.registry, |meta| meta.source.kind == SourceKind::Tool) {
                    return PolicyDecision::Block(format!(
                        "tool '{}' would exfiltrate tool-sourced data via group '{}'",
                        ctx.tool_name, ctx.tool_group
                    ));
                }
                PolicyDecision::Allow
            }
            PolicyKind::UserOriginRequired => {
                if ctx.operation_type != OperationType::Destructive {
                    return PolicyDecision::Allow;
                }
                if any_arg_matches(ctx.args, ctx.registry, |meta| meta.source.kind == SourceKind::User) {
                    return PolicyDecision::Allow;
                }
                PolicyDecision::Block(format!(
                    "destructive tool '{}' requires a user-origin argument",
                    ctx.tool_name
                ))
            }
        }
    }
}

/// Walk a JSON value's top-level scalars/strings and test whether any
/// resolves, by content digest, to a label satisfying `pred`.
fn any_arg_matches(
    args: &serde_json::Value,
    registry: &ProvenanceRegistry,
    pred: impl Fn(&crate::domain::provenance::ProvenanceMetadata) -> bool,
) -> bool {
    match args {
        serde_json::Value::Object(map) => map.values().any(|v| any_arg_matches(v, registry, &pred)),
        serde_json::Value::Array(items) => items.iter().any(|v| any_arg_matches(v, registry, &pred)),
        leaf => registry.lookup_primitive(leaf).map(&pred).unwrap_or(false),
    }
}

/// Shared wildcard matcher: exact match, or `*.suffix` matching any value
/// ending with `suffix`. Mirrors the teacher's capability-allowlist helper.
pub fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == value {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return value.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return value.starts_with(prefix);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provenance::{ProvenanceSource, Readers};
    use chrono::Utc;

    fn tool_source() -> ProvenanceSource {
        ProvenanceSource {
            kind: SourceKind::Tool,
            tool: Some("getSensitive".into()),
            operation: None,
            timestamp: Utc::now(),
        }
    }

    fn user_source() -> ProvenanceSource {
        ProvenanceSource {
            kind: SourceKind::User,
            tool: None,
            operation: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_exfiltration_blocks_tool_sourced_data_into_external_group() {
        let mut registry = ProvenanceRegistry::new();
        let secret = serde_json::json!("S");
        registry.mark_tainted(&secret, tool_source(), Readers::Public);

        let args = serde_json::json!({"data": "S"});
        let external = vec!["openapi.webhook".to_string()];
        let ctx = PolicyContext {
            tool_name: "exfiltrate",
            tool_group: "openapi.webhook",
            operation_type: OperationType::Write,
            args: &args,
            registry: &registry,
            external_groups: &external,
        };

        let decision = Policy::exfiltration().evaluate(&ctx);
        assert!(matches!(decision, PolicyDecision::Block(_)));
    }

    #[test]
    fn test_exfiltration_allows_clean_data() {
        let registry = ProvenanceRegistry::new();
        let args = serde_json::json!({"message": "Hello"});
        let external = vec!["openapi.webhook".to_string()];
        let ctx = PolicyContext {
            tool_name: "safeData",
            tool_group: "openapi.webhook",
            operation_type: OperationType::Write,
            args: &args,
            registry: &registry,
            external_groups: &external,
        };
        assert_eq!(Policy::exfiltration().evaluate(&ctx), PolicyDecision::Allow);
    }

    #[test]
    fn test_user_origin_required_blocks_destructive_without_user_label() {
        let registry = ProvenanceRegistry::new();
        let args = serde_json::json!({"id": "42"});
        let ctx = PolicyContext {
            tool_name: "deleteRecord",
            tool_group: "mcp.records",
            operation_type: OperationType::Destructive,
            args: &args,
            registry: &registry,
            external_groups: &[],
        };
        assert!(matches!(Policy::user_origin_required().evaluate(&ctx), PolicyDecision::Block(_)));
    }

    #[test]
    fn test_user_origin_required_allows_with_user_label() {
        let mut registry = ProvenanceRegistry::new();
        let confirmation = serde_json::json!("confirmed-by-user");
        registry.mark_tainted(&confirmation, user_source(), Readers::Public);
        let args = serde_json::json!({"confirmation": "confirmed-by-user"});
        let ctx = PolicyContext {
            tool_name: "deleteRecord",
            tool_group: "mcp.records",
            operation_type: OperationType::Destructive,
            args: &args,
            registry: &registry,
            external_groups: &[],
        };
        assert_eq!(Policy::user_origin_required().evaluate(&ctx), PolicyDecision::Allow);
    }

    #[test]
    fn test_matches_pattern_wildcard_suffix_and_prefix() {
        assert!(matches_pattern("*.webhook", "openapi.webhook"));
        assert!(matches_pattern("fs.*", "fs.readFile"));
        assert!(!matches_pattern("fs.*", "net.fetch"));
    }
}
