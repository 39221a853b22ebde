// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Program Rewriter (C6).
//!
//! Source is first parsed with `boa_parser` against an ECMAScript-2022
//! grammar purely to validate syntax (§4.3 Supplement: "parse with an
//! ECMAScript-2022 grammar and refuse on syntactic errors" — reused here
//! rather than duplicated in the Sandbox Host's code validator). The actual
//! rewrite is a source-to-source pass over pausing-call sites: the rewriter
//! re-emits text, not bytecode, so replay always re-compiles from a string
//! (the literal "re-runs from source" contract in §2).
//!
//! The rewrite pass is a bracket-aware scanner rather than a full AST
//! reconstruction: boa's AST is consumed for validation and is not required
//! to round-trip back to source losslessly, so finding call sites by
//! scanning balanced-paren call expressions keeps formatting intact for the
//! (common) case where a pausing call's argument list itself contains
//! nested parens or object/array literals.

use std::sync::Mutex;

use boa_interner::Interner;
use boa_parser::{Parser, Source};
use lru::LruCache;
use thiserror::Error;

use crate::domain::execution::CallbackKind;
use crate::domain::rewrite::stable_construct_id;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("syntax error: {0}")]
    Syntax(String),
}

#[derive(Debug, Clone)]
pub struct CallSite {
    pub construct_id: String,
    pub kind: CallbackKind,
    pub operation: String,
}

#[derive(Debug, Clone)]
pub struct RewrittenProgram {
    pub source: String,
    pub call_sites: Vec<CallSite>,
}

const PAUSING_NAMESPACES: &[(&str, CallbackKind)] = &[
    ("atp.llm.", CallbackKind::Llm),
    ("atp.approval.", CallbackKind::Approval),
    ("atp.embedding.", CallbackKind::Embedding),
];

pub struct ProgramRewriter {
    cache: Mutex<LruCache<(u64, String), RewrittenProgram>>,
}

impl ProgramRewriter {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(cache_capacity.max(1)).unwrap(),
            )),
        }
    }

    /// Parse `source` against the ECMAScript-2022 grammar, returning only
    /// whether it is well-formed. A malformed program is rejected with
    /// `parse_error` before any sandbox is created.
    pub fn validate_syntax(&self, source: &str) -> Result<(), RewriteError> {
        let mut interner = Interner::default();
        let mut parser = Parser::new(Source::from_bytes(source.as_bytes()));
        parser
            .parse_script(&boa_interner::Sym::EMPTY_STRING.into(), &mut interner)
            .map(|_| ())
            .or_else(|_| {
                // Fall back to module grammar; either succeeding means the
                // source is syntactically valid ECMAScript.
                let mut interner2 = Interner::default();
                let mut parser2 = Parser::new(Source::from_bytes(source.as_bytes()));
                parser2.parse_module(&mut interner2).map(|_| ())
            })
            .map_err(|e| RewriteError::Syntax(e.to_string()))
    }

    /// Rewrite `source`, caching by `(source_hash, salt)` since `resume`
    /// re-rewrites the identical source on every replay (§4.3 Supplement).
    pub fn rewrite(&self, source: &str, salt: &str, client_resident_groups: &[String]) -> Result<RewrittenProgram, RewriteError> {
        self.validate_syntax(source)?;

        let source_hash = {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            source.hash(&mut hasher);
            hasher.finish()
        };
        let cache_key = (source_hash, salt.to_string());
        if let Some(cached) = self.cache.lock().unwrap().get(&cache_key) {
            crate::infrastructure::metrics::record_rewrite_cache_hit();
            return Ok(cached.clone());
        }
        crate::infrastructure::metrics::record_rewrite_cache_miss();

        let result = rewrite_call_sites(source, salt, client_resident_groups);
        self.cache.lock().unwrap().put(cache_key, result.clone());
        Ok(result)
    }
}

/// Scan `source` for pausing-call fingerprints and wrap each with the
/// sandbox-injected `__atpCall` runtime helper, which consults the replay
/// log before falling through to a real pause (§4.3 point 1).
///
/// Two other constructs are recognised by the same scan:
/// - `Promise.all([...])` where every element is itself a pausing call is
///   lowered to a single `__atpCallBatch` site (§4.3 point 3), so a
///   parallel join of N independent calls produces one `Batch` pause
///   instead of N sequential ones.
/// - `for (...)`/`while (...)` loop bodies get a `__atpLoopIter` guard
///   injected at their head, wiring `domain::rewrite::LoopCheckpoint` and
///   `MAX_LOOP_ITERATIONS` into the live pipeline so a runaway loop fails
///   with `loop_detected` instead of spinning the sandbox forever.
fn rewrite_call_sites(source: &str, salt: &str, client_resident_groups: &[String]) -> RewrittenProgram {
    let mut out = String::with_capacity(source.len() + 256);
    let mut call_sites = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if let Some((consumed, items)) = match_batch_call(source, i, client_resident_groups) {
            let batch_id = stable_construct_id(salt, i, "BatchParallel");
            out.push_str("__atpCallBatch(\"");
            out.push_str(&batch_id);
            out.push_str("\", [");
            for (n, (item_id, kind, operation, args_text)) in items.iter().enumerate() {
                if n > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!(
                    "{{\"id\": \"{item_id}\", \"kind\": \"{}\", \"operation\": \"{operation}\", \"args\": [{args_text}]}}",
                    format!("{kind:?}").to_lowercase()
                ));
            }
            out.push_str("])");
            call_sites.push(CallSite {
                construct_id: batch_id,
                kind: CallbackKind::Batch,
                operation: "batchParallel".to_string(),
            });
            i += consumed;
            continue;
        }

        if let Some((kind, operation, call_len)) = match_pausing_call(source, i, client_resident_groups) {
            let construct_id = stable_construct_id(salt, i, "CallExpression");
            let args_start = i + call_len;
            if let Some(args_end) = find_matching_paren_close(source, args_start) {
                let args_text = &source[args_start + 1..args_end];
                out.push_str("__atpCall(\"");
                out.push_str(&construct_id);
                out.push_str("\", \"");
                out.push_str(&format!("{kind:?}").to_lowercase());
                out.push_str("\", \"");
                out.push_str(&operation);
                out.push_str("\", [");
                out.push_str(args_text);
                out.push_str("])");
                call_sites.push(CallSite { construct_id, kind, operation });
                i = args_end + 1;
                continue;
            }
        }

        if let Some((loop_kw_len, paren_open)) = match_loop_header(source, i) {
            let _ = loop_kw_len;
            if let Some(paren_close) = find_matching_paren_close(source, paren_open) {
                let after_paren = &source[paren_close + 1..];
                if let Some(rel) = after_paren.find(|c: char| !c.is_whitespace()) {
                    if after_paren.as_bytes()[rel] == b'{' {
                        let brace_open = paren_close + 1 + rel;
                        if let Some(brace_close) = find_matching_brace_close(source, brace_open) {
                            let _ = brace_close;
                            let loop_id = stable_construct_id(salt, i, "LoopStatement");
                            out.push_str(&source[i..=brace_open]);
                            out.push_str(&format!("__atpLoopIter(\"{loop_id}\");"));
                            i = brace_open + 1;
                            continue;
                        }
                    }
                }
            }
        }

        let ch_len = next_char_len(source, i);
        out.push_str(&source[i..i + ch_len]);
        i += ch_len;
    }

    RewrittenProgram { source: out, call_sites }
}

/// Recognise a `for (...)` or `while (...)` loop header at a word boundary,
/// returning the keyword's length and the byte offset of the header's
/// opening `(`.
fn match_loop_header(source: &str, i: usize) -> Option<(usize, usize)> {
    if i > 0 {
        let prev = source[..i].chars().next_back().unwrap();
        if prev.is_alphanumeric() || prev == '_' || prev == '$' {
            return None;
        }
    }
    let rest = &source[i..];
    for kw in ["for", "while"] {
        if let Some(after) = rest.strip_prefix(kw) {
            let ws = after.len() - after.trim_start().len();
            if after.as_bytes().first() != Some(&b'(') && ws == 0 {
                continue;
            }
            let after_ws = &after[ws..];
            if after_ws.starts_with('(') {
                return Some((kw.len(), i + kw.len() + ws));
            }
        }
    }
    None
}

/// Recognise `Promise.all([a, b, c])` where every array element is itself a
/// pausing call expression (§4.3 point 3). Returns the consumed byte length
/// of the whole `Promise.all(...)` expression plus the ordered `(id, kind,
/// operation, args_text)` tuples for each element. Falls through to `None`
/// (leaving the normal per-call rewrite to handle the elements individually)
/// for any `Promise.all` whose elements aren't all recognised pausing calls.
fn match_batch_call(
    source: &str,
    i: usize,
    client_resident_groups: &[String],
) -> Option<(usize, Vec<(String, CallbackKind, String, String)>)> {
    if i > 0 {
        let prev = source[..i].chars().next_back().unwrap();
        if prev.is_alphanumeric() || prev == '_' || prev == '$' {
            return None;
        }
    }
    let rest = &source[i..];
    let after = rest.strip_prefix("Promise.all")?;
    let ws = after.len() - after.trim_start().len();
    let after_ws = &after[ws..];
    if !after_ws.starts_with('(') {
        return None;
    }
    let call_open = i + "Promise.all".len() + ws;
    let call_close = find_matching_paren_close(source, call_open)?;

    let inner = &source[call_open + 1..call_close];
    let inner_ws = inner.len() - inner.trim_start().len();
    if !inner.trim_start().starts_with('[') {
        return None;
    }
    let bracket_open = call_open + 1 + inner_ws;
    let bracket_close = find_matching_bracket_close(source, bracket_open)?;
    if source[bracket_close + 1..call_close].trim() != "" {
        return None;
    }

    let mut items = Vec::new();
    let mut pos = bracket_open + 1;
    let mut idx = 0usize;
    while pos < bracket_close {
        let ch = source[pos..].chars().next().unwrap();
        if ch.is_whitespace() || ch == ',' {
            pos += ch.len_utf8();
            continue;
        }
        let (kind, operation, call_len) = match_pausing_call(source, pos, client_resident_groups)?;
        let args_start = pos + call_len;
        let args_end = find_matching_paren_close(source, args_start)?;
        let args_text = source[args_start + 1..args_end].to_string();
        items.push((idx.to_string(), kind, operation, args_text));
        idx += 1;
        pos = args_end + 1;
    }
    if items.is_empty() {
        return None;
    }
    Some((call_close - i + 1, items))
}

fn next_char_len(s: &str, byte_idx: usize) -> usize {
    s[byte_idx..].chars().next().map(|c| c.len_utf8()).unwrap_or(1)
}

/// Try to match a pausing-call prefix (`atp.llm.`, `atp.approval.`,
/// `atp.embedding.`, or `api.<client-resident-group>.`) starting at byte
/// offset `i`, followed by an identifier and an opening paren. Returns the
/// callback kind, the dotted operation name, and the byte length of the
/// matched `name(` prefix (up to and including the opening paren).
fn match_pausing_call(source: &str, i: usize, client_resident_groups: &[String]) -> Option<(CallbackKind, String, usize)> {
    let rest = &source[i..];

    for (prefix, kind) in PAUSING_NAMESPACES {
        if let Some(after) = rest.strip_prefix(prefix) {
            let (method, method_len) = take_identifier(after)?;
            let full_len = prefix.len() + method_len;
            if rest[full_len..].trim_start().starts_with('(') {
                let paren_offset = rest[full_len..].find('(').unwrap();
                let operation = format!("{}{}", prefix, method);
                return Some((*kind, operation, full_len + paren_offset + 1));
            }
        }
    }

    if let Some(after) = rest.strip_prefix("api.") {
        let (group, group_len) = take_identifier(after)?;
        if !client_resident_groups.iter().any(|g| g == group) {
            return None;
        }
        if !after[group_len..].starts_with('.') {
            return None;
        }
        let (method, method_len) = take_identifier(&after[group_len + 1..])?;
        let full_len = 4 + group_len + 1 + method_len;
        if rest[full_len..].trim_start().starts_with('(') {
            let paren_offset = rest[full_len..].find('(').unwrap();
            let operation = format!("api.{group}.{method}");
            return Some((CallbackKind::Tool, operation, full_len + paren_offset + 1));
        }
    }

    None
}

fn take_identifier(s: &str) -> Option<(&str, usize)> {
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        if idx == 0 && !(c.is_alphabetic() || c == '_' || c == '$') {
            return None;
        }
        if !(c.is_alphanumeric() || c == '_' || c == '$') {
            end = idx;
            break;
        }
        end = idx + c.len_utf8();
    }
    if end == 0 {
        return None;
    }
    Some((&s[..end], end))
}

/// Given the byte offset of an opening `(`, find the byte offset of its
/// matching `)`, respecting nested parens and (naively) skipping over
/// string/template literal contents so a `)` inside a string doesn't end
/// the match early.
fn find_matching_paren_close(source: &str, open_idx: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    if bytes.get(open_idx) != Some(&b'(') {
        return None;
    }
    let mut depth = 0i32;
    let mut i = open_idx;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(quote) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' | b'`' => in_string = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Same balancing rule as [`find_matching_paren_close`] for `[...]`.
fn find_matching_bracket_close(source: &str, open_idx: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    if bytes.get(open_idx) != Some(&b'[') {
        return None;
    }
    let mut depth = 0i32;
    let mut i = open_idx;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(quote) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' | b'`' => in_string = Some(b),
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Same balancing rule as [`find_matching_paren_close`] for `{...}`.
fn find_matching_brace_close(source: &str, open_idx: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    if bytes.get(open_idx) != Some(&b'{') {
        return None;
    }
    let mut depth = 0i32;
    let mut i = open_idx;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(quote) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' | b'`' => in_string = Some(b),
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_syntax_accepts_well_formed_program() {
        let rewriter = ProgramRewriter::new(16);
        assert!(rewriter.validate_syntax("return 2 + 2;").is_ok());
    }

    #[test]
    fn test_validate_syntax_rejects_malformed_program() {
        let rewriter = ProgramRewriter::new(16);
        assert!(rewriter.validate_syntax("function ( { ").is_err());
    }

    #[test]
    fn test_rewrite_wraps_llm_call() {
        let rewriter = ProgramRewriter::new(16);
        let source = r#"return atp.llm.call({prompt: "A"});"#;
        let rewritten = rewriter.rewrite(source, "salt-1", &[]).unwrap();
        assert_eq!(rewritten.call_sites.len(), 1);
        assert_eq!(rewritten.call_sites[0].kind, CallbackKind::Llm);
        assert_eq!(rewritten.call_sites[0].operation, "atp.llm.call");
        assert!(rewritten.source.contains("__atpCall("));
        assert!(rewritten.source.contains("\"llm\""));
    }

    #[test]
    fn test_rewrite_preserves_nested_parens_in_args() {
        let rewriter = ProgramRewriter::new(16);
        let source = r#"atp.llm.call({prompt: foo(bar(1), 2)});"#;
        let rewritten = rewriter.rewrite(source, "salt", &[]).unwrap();
        assert_eq!(rewritten.call_sites.len(), 1);
        assert!(rewritten.source.contains("foo(bar(1), 2)"));
    }

    #[test]
    fn test_rewrite_recognises_client_resident_tool_call() {
        let rewriter = ProgramRewriter::new(16);
        let groups = vec!["filesystem".to_string()];
        let source = r#"api.filesystem.readFile({path: "x"});"#;
        let rewritten = rewriter.rewrite(source, "salt", &groups).unwrap();
        assert_eq!(rewritten.call_sites.len(), 1);
        assert_eq!(rewritten.call_sites[0].kind, CallbackKind::Tool);
        assert_eq!(rewritten.call_sites[0].operation, "api.filesystem.readFile");
    }

    #[test]
    fn test_rewrite_ignores_non_client_resident_api_group() {
        let rewriter = ProgramRewriter::new(16);
        let source = r#"api.openapi_github.getUser({username: "x"});"#;
        let rewritten = rewriter.rewrite(source, "salt", &[]).unwrap();
        assert!(rewritten.call_sites.is_empty());
    }

    #[test]
    fn test_rewrite_assigns_stable_ids_across_repeated_calls() {
        let rewriter = ProgramRewriter::new(16);
        let out1 = rewriter.rewrite("atp.llm.call({});", "salt-x", &[]).unwrap();
        let out2 = rewriter.rewrite("atp.llm.call({});", "salt-x", &[]).unwrap();
        assert_eq!(out1.call_sites[0].construct_id, out2.call_sites[0].construct_id);
    }

    #[test]
    fn test_rewrite_is_cached() {
        let rewriter = ProgramRewriter::new(16);
        let first = rewriter.rewrite("return 1;", "s", &[]).unwrap();
        let second = rewriter.rewrite("return 1;", "s", &[]).unwrap();
        assert_eq!(first.source, second.source);
    }

    #[test]
    fn test_rewrite_lowers_promise_all_of_pausing_calls_to_batch() {
        let rewriter = ProgramRewriter::new(16);
        let source = r#"return Promise.all([atp.llm.call({prompt: "A"}), atp.llm.call({prompt: "B"})]);"#;
        let rewritten = rewriter.rewrite(source, "salt", &[]).unwrap();
        assert_eq!(rewritten.call_sites.len(), 1);
        assert_eq!(rewritten.call_sites[0].kind, CallbackKind::Batch);
        assert_eq!(rewritten.call_sites[0].operation, "batchParallel");
        assert!(rewritten.source.contains("__atpCallBatch("));
        assert!(rewritten.source.contains("\"id\": \"0\""));
        assert!(rewritten.source.contains("\"id\": \"1\""));
    }

    #[test]
    fn test_rewrite_leaves_promise_all_of_non_pausing_elements_alone() {
        let rewriter = ProgramRewriter::new(16);
        let source = r#"return Promise.all([1, 2]);"#;
        let rewritten = rewriter.rewrite(source, "salt", &[]).unwrap();
        assert!(rewritten.call_sites.is_empty());
        assert!(rewritten.source.contains("Promise.all([1, 2])"));
    }

    #[test]
    fn test_rewrite_injects_loop_guard_into_for_loop_body() {
        let rewriter = ProgramRewriter::new(16);
        let source = "for (let i = 0; i < 10; i++) { doWork(i); }";
        let rewritten = rewriter.rewrite(source, "salt", &[]).unwrap();
        assert!(rewritten.source.contains("__atpLoopIter("));
        assert!(rewritten.source.contains("doWork(i);"));
    }

    #[test]
    fn test_rewrite_injects_loop_guard_into_while_loop_body() {
        let rewriter = ProgramRewriter::new(16);
        let source = "while (hasMore()) { step(); }";
        let rewritten = rewriter.rewrite(source, "salt", &[]).unwrap();
        assert!(rewritten.source.contains("__atpLoopIter("));
    }
}
