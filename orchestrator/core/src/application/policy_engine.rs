// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy Engine (C9) application service.
//!
//! Thin wrapper over an ordered list of [`crate::domain::policy::Policy`]
//! evaluations, mirroring the teacher's `infrastructure::smcp::PolicyEngine`
//! (`evaluate()` delegating to `security_context.evaluate()`) but operating
//! over the provenance-label model instead of a single capability list.

use tracing::{info, warn};

use crate::domain::policy::{Policy, PolicyContext, PolicyDecision};

pub struct PolicyEngine {
    policies: Vec<Policy>,
}

impl PolicyEngine {
    /// The two built-ins named in §4.6, in the order the spec lists them.
    pub fn with_defaults() -> Self {
        Self {
            policies: vec![Policy::exfiltration(), Policy::user_origin_required()],
        }
    }

    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }

    /// Evaluate every policy in order; the first `Block` wins. `Log`
    /// decisions are recorded via `tracing` but do not affect the outcome.
    pub fn evaluate(&self, ctx: &PolicyContext<'_>) -> PolicyDecision {
        for policy in &self.policies {
            match policy.evaluate(ctx) {
                PolicyDecision::Block(reason) => {
                    warn!(policy = %policy.name, tool = %ctx.tool_name, %reason, "policy blocked call");
                    crate::infrastructure::metrics::record_policy_block(&policy.name);
                    return PolicyDecision::Block(reason);
                }
                PolicyDecision::Log => {
                    info!(policy = %policy.name, tool = %ctx.tool_name, "policy logged call");
                }
                PolicyDecision::Allow => {}
            }
        }
        PolicyDecision::Allow
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::OperationType;
    use crate::domain::provenance::{ProvenanceRegistry, ProvenanceSource, Readers, SourceKind};

    fn tool_source() -> ProvenanceSource {
        ProvenanceSource {
            kind: SourceKind::Tool,
            tool: Some("getSensitive".into()),
            operation: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_first_block_wins_and_short_circuits() {
        let mut registry = ProvenanceRegistry::new();
        registry.mark_tainted(&serde_json::json!("S"), tool_source(), Readers::Public);
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
        let engine = PolicyEngine::with_defaults();
        assert!(matches!(engine.evaluate(&ctx), PolicyDecision::Block(_)));
    }

    #[test]
    fn test_allows_clean_non_destructive_call() {
        let registry = ProvenanceRegistry::new();
        let args = serde_json::json!({"message": "Hello"});
        let ctx = PolicyContext {
            tool_name: "safeData",
            tool_group: "mcp.notes",
            operation_type: OperationType::Read,
            args: &args,
            registry: &registry,
            external_groups: &[],
        };
        let engine = PolicyEngine::with_defaults();
        assert_eq!(engine.evaluate(&ctx), PolicyDecision::Allow);
    }
}
