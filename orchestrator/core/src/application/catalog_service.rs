// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool Catalog, Explorer & Search (C2, C10) application service.
//!
//! `search` ranks by substring matches plus token-set overlap; `explore`
//! renders the catalog as the virtual directory tree described in §4.7:
//! `/ → {openapi, mcp, custom} → <group> → [<segment>/]… → <function>`.

use std::collections::HashSet;

use crate::domain::tool_catalog::{ToolCatalog, ToolDescriptor};

const VERB_PREFIXES: &[&str] = &["get", "list", "create", "update", "delete", "post", "put", "patch"];

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchMatch {
    pub qualified_name: String,
    pub description: String,
    pub score: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum ExploreResult {
    #[serde(rename = "directory")]
    Directory { path: String, items: Vec<DirectoryItem> },
    #[serde(rename = "function")]
    Function { descriptor: ToolDescriptor },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DirectoryItem {
    pub name: String,
    pub is_directory: bool,
}

pub struct CatalogService {
    catalog: ToolCatalog,
    /// Scope set applied when a caller has no credentials of its own
    /// (§7 Supplement: expired token and missing scope provider both fall
    /// back here uniformly). Empty means "public tools only".
    fallback_scopes: Vec<String>,
}

impl CatalogService {
    pub fn new(catalog: ToolCatalog, fallback_scopes: Vec<String>) -> Self {
        Self { catalog, fallback_scopes }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn fallback_scopes(&self) -> &[String] {
        &self.fallback_scopes
    }

    /// Renders the tools a caller can see (§7 Supplement's scope-filter
    /// fallback) as TypeScript-style interface declarations: one
    /// `interface` per tool's input shape plus an overloaded-looking call
    /// signature, so the agent's program can be authored against a
    /// familiar type surface (§4.7 Supplement).
    pub fn render_typescript_like(&self, scopes: &[String]) -> String {
        let mut out = String::new();
        for tool in self.catalog.visible_with_fallback(scopes, &self.fallback_scopes) {
            let iface_name = format!("{}Args", capitalize(&tool.name));
            out.push_str(&format!("interface {iface_name} {}\n", render_schema_body(&tool.input_schema)));
            out.push_str(&format!(
                "declare function {}(args: {iface_name}): Promise<unknown>; // {}\n\n",
                tool.qualified_name().replace('.', "_"),
                tool.description,
            ));
        }
        out
    }

    /// The qualified names a caller may see, resolved the same way
    /// [`Self::render_typescript_like`] resolves them: `scopes` if
    /// non-empty, otherwise the configured fallback set (§7 Supplement).
    fn visible_qualified_names(&self, scopes: &[String]) -> HashSet<String> {
        self.catalog
            .visible_with_fallback(scopes, &self.fallback_scopes)
            .into_iter()
            .map(|t| t.qualified_name())
            .collect()
    }

    /// Ranked keyword search. `apiGroups` optionally restricts the search to
    /// a subset of top-level namespaces/groups; `scopes` restricts results
    /// to tools the caller can actually see, matching `/api/definitions`'
    /// visibility rules so search never surfaces a tool a client couldn't
    /// then call.
    pub fn search(&self, query: &str, api_groups: Option<&[String]>, scopes: &[String], max_results: usize) -> Vec<SearchMatch> {
        let visible = self.visible_qualified_names(scopes);
        let query_lower = query.to_lowercase();
        let query_tokens: HashSet<&str> = query_lower.split_whitespace().collect();

        let mut matches: Vec<SearchMatch> = self
            .catalog
            .all_tools()
            .filter(|t| visible.contains(&t.qualified_name()))
            .filter(|t| api_groups.map(|groups| groups.iter().any(|g| t.group.starts_with(g.as_str()))).unwrap_or(true))
            .filter_map(|t| {
                let haystack = format!("{} {}", t.name, t.description).to_lowercase();
                let substring_hit = haystack.contains(&query_lower);

                let haystack_tokens: HashSet<&str> = haystack.split_whitespace().collect();
                let overlap = query_tokens.intersection(&haystack_tokens).count();

                if !substring_hit && overlap == 0 {
                    return None;
                }

                let mut score = overlap as f64;
                if substring_hit {
                    score += 2.0;
                }
                if t.name.to_lowercase() == query_lower {
                    score += 5.0;
                }

                Some(SearchMatch {
                    qualified_name: t.qualified_name(),
                    description: t.description.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(max_results);
        matches
    }

    /// Resolve a virtual directory path into either a directory listing or
    /// a function descriptor. Paths are `/`-delimited and rooted at the
    /// three namespaces. `scopes` filters every level the same way
    /// `/api/definitions` and `/api/search` do: a namespace, group, or
    /// function with nothing visible under it is treated as not found
    /// rather than listed empty, so exploring never reveals a tool's
    /// existence to a caller that can't see it.
    pub fn explore(&self, path: &str, scopes: &[String]) -> Option<ExploreResult> {
        let visible = self.visible_qualified_names(scopes);
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Some(self.root_listing(&visible));
        }

        let segments: Vec<&str> = trimmed.split('/').collect();
        let namespace = segments[0];

        // Try matching against a group path exactly, then look for the
        // final segment as a function name.
        for group in &self.catalog.groups {
            if group.namespace != namespace {
                continue;
            }
            if segments.len() >= 2 && group.name == segments[1] {
                if segments.len() == 2 {
                    let listing = self.group_listing(group, &visible);
                    return match &listing {
                        ExploreResult::Directory { items, .. } if items.is_empty() => None,
                        _ => Some(listing),
                    };
                }
                // Remaining segments address a function by its REST-style
                // path segmentation (verb-prefix or _/- split).
                let remainder = &segments[2..];
                for tool in &group.tools {
                    if tool_segments(&tool.name) == remainder {
                        if !visible.contains(&tool.qualified_name()) {
                            return None;
                        }
                        return Some(ExploreResult::Function { descriptor: tool.clone() });
                    }
                }
            }
        }
        None
    }

    fn root_listing(&self, visible: &HashSet<String>) -> ExploreResult {
        let mut namespaces: Vec<&str> = self
            .catalog
            .groups
            .iter()
            .filter(|g| g.tools.iter().any(|t| visible.contains(&t.qualified_name())))
            .map(|g| g.namespace.as_str())
            .collect();
        namespaces.sort();
        namespaces.dedup();
        let items = namespaces
            .into_iter()
            .map(|n| DirectoryItem { name: n.to_string(), is_directory: true })
            .collect();
        ExploreResult::Directory { path: "/".to_string(), items }
    }

    fn group_listing(&self, group: &crate::domain::tool_catalog::ToolGroup, visible: &HashSet<String>) -> ExploreResult {
        let mut items: Vec<DirectoryItem> = group
            .tools
            .iter()
            .filter(|t| visible.contains(&t.qualified_name()))
            .map(|t| DirectoryItem { name: t.name.clone(), is_directory: false })
            .collect();
        items.sort_by(|a, b| b.is_directory.cmp(&a.is_directory).then(a.name.cmp(&b.name)));
        ExploreResult::Directory { path: group.path(), items }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Renders a JSON Schema object's `properties` as a TypeScript object-type
/// body. Intentionally shallow: nested objects/arrays fall back to `any`,
/// since the catalog's schemas are flat REST/MCP argument shapes in
/// practice and a general JSON-Schema-to-TS translator is out of scope.
fn render_schema_body(schema: &serde_json::Value) -> String {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return "{ [key: string]: unknown }".to_string();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut body = String::from("{\n");
    for (name, prop) in properties {
        let optional = if required.contains(&name.as_str()) { "" } else { "?" };
        let ts_type = json_schema_type_to_ts(prop);
        body.push_str(&format!("  {name}{optional}: {ts_type};\n"));
    }
    body.push('}');
    body
}

fn json_schema_type_to_ts(prop: &serde_json::Value) -> &'static str {
    match prop.get("type").and_then(|t| t.as_str()) {
        Some("string") => "string",
        Some("number") | Some("integer") => "number",
        Some("boolean") => "boolean",
        Some("array") => "unknown[]",
        Some("object") => "Record<string, unknown>",
        _ => "unknown",
    }
}

/// Split a REST-style function name into path segments by stripping a
/// known verb prefix, or falling back to `_`/`-` splitting (§4.7).
fn tool_segments(name: &str) -> Vec<&str> {
    for verb in VERB_PREFIXES {
        if let Some(rest) = name.strip_prefix(verb) {
            if !rest.is_empty() {
                return vec![name];
            }
        }
    }
    if name.contains('_') {
        return name.split('_').collect();
    }
    if name.contains('-') {
        return name.split('-').collect();
    }
    vec![name]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool_catalog::{ToolGroup, ToolMetadata};

    fn sample_catalog() -> ToolCatalog {
        ToolCatalog {
            groups: vec![ToolGroup {
                namespace: "openapi".into(),
                name: "github".into(),
                tools: vec![ToolDescriptor {
                    name: "getUser".into(),
                    group: "openapi/github".into(),
                    description: "fetch a github user by username".into(),
                    input_schema: serde_json::json!({"type":"object","properties":{"username":{"type":"string"}}}),
                    output_schema: None,
                    metadata: ToolMetadata::default(),
                }],
            }],
        }
    }

    #[test]
    fn test_search_substring_match() {
        let service = CatalogService::new(sample_catalog(), vec![]);
        let matches = service.search("github user", None, &[], 10);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].qualified_name, "openapi.github.getUser");
    }

    #[test]
    fn test_search_no_match_returns_empty() {
        let service = CatalogService::new(sample_catalog(), vec![]);
        assert!(service.search("completely unrelated", None, &[], 10).is_empty());
    }

    #[test]
    fn test_explore_root_lists_namespaces() {
        let service = CatalogService::new(sample_catalog(), vec![]);
        match service.explore("/", &[]).unwrap() {
            ExploreResult::Directory { items, .. } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].name, "openapi");
            }
            _ => panic!("expected directory"),
        }
    }

    #[test]
    fn test_explore_function_path() {
        let service = CatalogService::new(sample_catalog(), vec![]);
        match service.explore("/openapi/github/getUser", &[]).unwrap() {
            ExploreResult::Function { descriptor } => assert_eq!(descriptor.name, "getUser"),
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_explore_missing_path_returns_none() {
        let service = CatalogService::new(sample_catalog(), vec![]);
        assert!(service.explore("/openapi/github/missingFn", &[]).is_none());
    }

    #[test]
    fn test_render_typescript_like_includes_tool_signature() {
        let service = CatalogService::new(sample_catalog(), vec![]);
        let rendered = service.render_typescript_like(&[]);
        assert!(rendered.contains("interface GetUserArgs"));
        assert!(rendered.contains("declare function openapi_github_getUser"));
        assert!(rendered.contains("username?: string;"));
    }
}
