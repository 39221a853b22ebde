// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool Catalog & Type Surface (C2) domain model.
//!
//! Grounded on the teacher's `domain::mcp` tool-server/tool shape, stripped
//! of container lifecycle (`ToolServerStatus`, process ids, health checks —
//! none of which apply here: tools are descriptors, not managed processes)
//! and generalised to the three source namespaces this system aggregates:
//! `openapi`, `mcp`, and `custom` (user-defined).

use serde::{Deserialize, Serialize};

use crate::domain::policy::OperationType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Server,
    User,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetadata {
    #[serde(default)]
    pub required_scopes: Vec<String>,
    pub operation_type: Option<OperationType>,
    pub sensitivity: Option<Sensitivity>,
    pub source: Option<ToolSource>,
}

/// One catalogued function. `group` is the slash-delimited path rooted at
/// one of `openapi`, `mcp`, `custom` (e.g. `openapi/github`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub group: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: ToolMetadata,
}

impl ToolDescriptor {
    /// Full dotted path used as the pausing-call fingerprint operation,
    /// e.g. `openapi.github.getUser`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.group.replace('/', "."), self.name)
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self.metadata.operation_type, Some(OperationType::Destructive))
    }

    /// Whether a caller holding `scopes` may see/call this tool: every
    /// `requiredScopes` entry must be present (subset check). A tool with
    /// no required scopes is public.
    pub fn visible_to(&self, scopes: &[String]) -> bool {
        self.metadata
            .required_scopes
            .iter()
            .all(|required| scopes.iter().any(|s| s == required))
    }
}

/// A named collection of tools sharing a top-level namespace
/// (`openapi`, `mcp`, or `custom`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolGroup {
    pub namespace: String,
    pub name: String,
    pub tools: Vec<ToolDescriptor>,
}

impl ToolGroup {
    pub fn path(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// The full catalog: all groups known to this server instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCatalog {
    pub groups: Vec<ToolGroup>,
}

impl ToolCatalog {
    pub fn all_tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.groups.iter().flat_map(|g| g.tools.iter())
    }

    pub fn find(&self, group_path: &str, tool_name: &str) -> Option<&ToolDescriptor> {
        self.groups
            .iter()
            .find(|g| g.path() == group_path)
            .and_then(|g| g.tools.iter().find(|t| t.name == tool_name))
    }

    pub fn find_by_qualified_name(&self, qualified: &str) -> Option<&ToolDescriptor> {
        self.all_tools().find(|t| t.qualified_name() == qualified)
    }

    /// Tools visible under the catalog's fallback scope set (§7 Supplement:
    /// expired/missing credentials both fall back uniformly here).
    pub fn visible_with_fallback(&self, scopes: &[String], fallback: &[String]) -> Vec<&ToolDescriptor> {
        let effective: Vec<String> = if scopes.is_empty() {
            fallback.to_vec()
        } else {
            scopes.to_vec()
        };
        self.all_tools().filter(|t| t.visible_to(&effective)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, group: &str, required_scopes: Vec<&str>) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            group: group.to_string(),
            description: "desc".to_string(),
            input_schema: serde_json::json!({}),
            output_schema: None,
            metadata: ToolMetadata {
                required_scopes: required_scopes.into_iter().map(String::from).collect(),
                operation_type: Some(OperationType::Read),
                sensitivity: Some(Sensitivity::Low),
                source: Some(ToolSource::Server),
            },
        }
    }

    #[test]
    fn test_qualified_name_dotted() {
        let t = tool("getUser", "openapi/github", vec![]);
        assert_eq!(t.qualified_name(), "openapi.github.getUser");
    }

    #[test]
    fn test_visible_to_requires_subset_of_scopes() {
        let t = tool("deleteRepo", "openapi/github", vec!["repo:admin"]);
        assert!(!t.visible_to(&[]));
        assert!(t.visible_to(&["repo:admin".to_string()]));
    }

    #[test]
    fn test_catalog_find_by_group_and_name() {
        let catalog = ToolCatalog {
            groups: vec![ToolGroup {
                namespace: "openapi".into(),
                name: "github".into(),
                tools: vec![tool("getUser", "openapi/github", vec![])],
            }],
        };
        assert!(catalog.find("openapi/github", "getUser").is_some());
        assert!(catalog.find("openapi/github", "missing").is_none());
    }

    #[test]
    fn test_visible_with_fallback_uses_fallback_when_scopes_empty() {
        let catalog = ToolCatalog {
            groups: vec![ToolGroup {
                namespace: "mcp".into(),
                name: "records".into(),
                tools: vec![tool("readRecord", "mcp/records", vec![])],
            }],
        };
        let visible = catalog.visible_with_fallback(&[], &[]);
        assert_eq!(visible.len(), 1);
    }
}
