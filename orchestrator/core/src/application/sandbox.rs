// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Sandbox Host (C7).
//!
//! One [`SandboxHost::execute`] call creates a fresh, isolated `boa_engine`
//! context, injects the `atp`/`api` namespaces as native functions (never
//! live Rust object references — §9 "capability-only surface"), enforces
//! the wall-clock and heap ceilings, and reports the single pausing call
//! (if any) that suspended the run.
//!
//! Cooperative suspension follows §4.4 literally at the guest boundary:
//! the injected `__atpCall` throws a distinguished pause-marker error that
//! unwinds the guest program; this module catches that at the `eval`
//! boundary and converts it into the explicit [`SandboxOutcome`] sum type
//! the Core actually drives (§4.5 Supplement).
//!
//! `atp.llm`/`atp.approval`/`atp.embedding` and client-resident `api.<group>`
//! calls never exist as runtime objects in this context: the rewriter (C6)
//! already lowers them to `__atpCall`/`__atpCallBatch` before the source
//! reaches here, because a plain synchronous method call cannot itself
//! suspend the interpreter. `atp.cache.*` is different — it never pauses —
//! so it is installed here as a genuine object surface backed by
//! [`CacheBridge`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boa_ast::expression::access::{PropertyAccess, PropertyAccessField};
use boa_ast::expression::Identifier;
use boa_ast::visitor::{Visitor, VisitWith};
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsError, JsValue, NativeFunction, Source};
use boa_interner::Interner;
use boa_parser::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::cache_service::CacheService;
use crate::domain::execution::CallbackKind;
use crate::domain::rewrite::{LoopCheckpoint, MAX_LOOP_ITERATIONS};
use crate::domain::session::ClientId;

const PAUSE_MARKER: &str = "__ATP_PAUSE_MARKER__";
const LOOP_LIMIT_MARKER: &str = "__ATP_LOOP_LIMIT__";
const MEMORY_LIMIT_MARKER: &str = "__ATP_MEMORY_LIMIT__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRequest {
    pub construct_id: String,
    pub kind: CallbackKind,
    pub operation: String,
    pub payload: serde_json::Value,
}

/// Resource usage observed over one `execute` call, surfaced to callers as
/// `ExecutionResultView.stats` (§6).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub duration_ms: u64,
    /// Cumulative serialized byte size of every value that crossed the
    /// `__atpCall`/`__atpCallBatch` boundary during this run. A proxy for
    /// heap pressure, not a true allocator reading — boa_engine does not
    /// expose a per-context heap-byte counter, so this is the closest
    /// enforceable signal available without instrumenting the allocator.
    pub memory_used_bytes: u64,
}

#[derive(Debug)]
pub enum SandboxOutcome {
    Completed(serde_json::Value, RunStats),
    Paused(PauseRequest, RunStats),
    Error(SandboxError, RunStats),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("execution exceeded its wall-clock budget")]
    Timeout,
    #[error("execution exceeded its heap-memory ceiling")]
    MemoryExceeded,
    #[error("maximum LLM call count exceeded")]
    LlmCallsExceeded,
    #[error("loop iteration limit exceeded")]
    LoopLimitExceeded,
    #[error("program rejected at validation: {0}")]
    SecurityViolation(String),
    #[error("uncaught script error: {0}")]
    ScriptError(String),
}

pub struct SandboxLimits {
    pub timeout: Duration,
    pub max_heap_bytes: u64,
    pub max_llm_calls: u32,
}

/// What the replay log says about one pausing-call construct: either it
/// was already resolved (replay returns the value without pausing) or this
/// is the first time it's reached (the sandbox should pause here).
pub enum ReplayLookup {
    Resolved(serde_json::Value),
    Unresolved,
}

/// Synchronous bridge from the (non-`Send`, single-threaded) boa context to
/// the async [`CacheService`], scoped to one tenant for the lifetime of a
/// single `execute` call. Guest code never sees an async surface — `atp.cache`
/// calls look like any other synchronous host function.
pub struct CacheBridge {
    pub client_id: ClientId,
    pub cache: Arc<CacheService>,
}

impl CacheBridge {
    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        Self::block_on(self.cache.get(&self.client_id, key)).ok().flatten()
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl_secs: Option<u64>) {
        let _ = Self::block_on(self.cache.set(&self.client_id, key, value, ttl_secs));
    }

    fn has(&self, key: &str) -> bool {
        Self::block_on(self.cache.has(&self.client_id, key)).unwrap_or(false)
    }

    fn delete(&self, key: &str) {
        let _ = Self::block_on(self.cache.delete(&self.client_id, key));
    }
}

pub struct SandboxHost;

impl SandboxHost {
    pub fn new() -> Self {
        Self
    }

    /// Forbidden-form validation, performed before any sandbox is created
    /// (§4.4 "Code validation"). Walks the parsed `boa_ast` tree rather than
    /// matching substrings, so a string literal or identifier that merely
    /// *contains* a forbidden name (`"processed"`, a local var `moduleId`)
    /// doesn't misfire, while every real identifier reference and static
    /// property access is actually checked.
    pub fn validate_forbidden_forms(&self, source: &str) -> Result<(), SandboxError> {
        let mut interner = Interner::default();
        let mut parser = Parser::new(Source::from_bytes(source.as_bytes()));
        let script = parser
            .parse_script(&boa_interner::Sym::EMPTY_STRING.into(), &mut interner)
            .map_err(|e| SandboxError::ScriptError(format!("parse error during validation: {e}")))?;

        let mut visitor = ForbiddenFormVisitor { interner: &interner, violation: None };
        let _ = script.visit_with(&mut visitor);
        match visitor.violation {
            Some(violation) => Err(SandboxError::SecurityViolation(violation)),
            None => Ok(()),
        }
    }

    /// Run `rewritten_source` to completion, to its first (new) pause, or
    /// to an error. `replay` is consulted by the injected `__atpCall`
    /// helper for every construct id it's asked about; `lookup` returning
    /// `Unresolved` is what causes a pause.
    pub fn execute(
        &self,
        rewritten_source: &str,
        limits: &SandboxLimits,
        cache: Option<Arc<CacheBridge>>,
        replay: impl Fn(&str, CallbackKind, &str, &serde_json::Value) -> ReplayLookup + 'static,
    ) -> SandboxOutcome {
        let run_started = Instant::now();
        if let Err(e) = self.validate_forbidden_forms(rewritten_source) {
            return SandboxOutcome::Error(e, RunStats { duration_ms: elapsed_ms(run_started), memory_used_bytes: 0 });
        }

        let pause_slot: Rc<RefCell<Option<PauseRequest>>> = Rc::new(RefCell::new(None));
        let llm_call_count: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
        let memory_used: Rc<RefCell<u64>> = Rc::new(RefCell::new(0));
        let loop_checkpoints: Rc<RefCell<HashMap<String, LoopCheckpoint>>> = Rc::new(RefCell::new(HashMap::new()));
        let deadline = Instant::now() + limits.timeout;
        let max_heap_bytes = limits.max_heap_bytes;

        let stats = |memory_used: &Rc<RefCell<u64>>| RunStats {
            duration_ms: elapsed_ms(run_started),
            memory_used_bytes: *memory_used.borrow(),
        };

        let mut context = Context::default();
        // boa's own anti-DoS ceiling: bounds every loop regardless of
        // whether the rewriter recognised its shape, so a bare
        // `while (true) {}` the textual scanner missed still terminates.
        context.runtime_limits_mut().set_loop_iteration_limit(MAX_LOOP_ITERATIONS);
        context.runtime_limits_mut().set_recursion_limit(2048);

        if let Err(e) = install_atp_call(
            &mut context,
            pause_slot.clone(),
            llm_call_count.clone(),
            limits.max_llm_calls,
            memory_used.clone(),
            max_heap_bytes,
            deadline,
            replay,
        ) {
            return SandboxOutcome::Error(SandboxError::ScriptError(e.to_string()), stats(&memory_used));
        }
        if let Err(e) = install_atp_loop_iter(&mut context, loop_checkpoints, deadline) {
            return SandboxOutcome::Error(SandboxError::ScriptError(e.to_string()), stats(&memory_used));
        }
        if let Err(e) = install_atp_namespace(&mut context, cache) {
            return SandboxOutcome::Error(SandboxError::ScriptError(e.to_string()), stats(&memory_used));
        }

        if Instant::now() > deadline {
            return SandboxOutcome::Error(SandboxError::Timeout, stats(&memory_used));
        }

        match context.eval(Source::from_bytes(rewritten_source)) {
            Ok(value) => {
                if let Some(pause) = pause_slot.borrow_mut().take() {
                    return SandboxOutcome::Paused(pause, stats(&memory_used));
                }
                match js_value_to_json(&value, &mut context) {
                    Ok(json) => SandboxOutcome::Completed(json, stats(&memory_used)),
                    Err(e) => SandboxOutcome::Error(SandboxError::ScriptError(e), stats(&memory_used)),
                }
            }
            Err(err) => {
                if let Some(pause) = pause_slot.borrow_mut().take() {
                    return SandboxOutcome::Paused(pause, stats(&memory_used));
                }
                let msg = err.to_string();
                if msg.contains(LOOP_LIMIT_MARKER) {
                    return SandboxOutcome::Error(SandboxError::LoopLimitExceeded, stats(&memory_used));
                }
                if msg.contains(MEMORY_LIMIT_MARKER) {
                    return SandboxOutcome::Error(SandboxError::MemoryExceeded, stats(&memory_used));
                }
                if msg.contains(PAUSE_MARKER) {
                    // Pause marker thrown but the slot wasn't populated
                    // (defensive: should not happen given install_atp_call
                    // always fills the slot before throwing).
                    return SandboxOutcome::Error(
                        SandboxError::ScriptError("pause marker observed without a recorded pause request".into()),
                        stats(&memory_used),
                    );
                }
                if msg.to_lowercase().contains("loop") && msg.to_lowercase().contains("limit") {
                    return SandboxOutcome::Error(SandboxError::LoopLimitExceeded, stats(&memory_used));
                }
                SandboxOutcome::Error(SandboxError::ScriptError(msg), stats(&memory_used))
            }
        }
    }
}

impl Default for SandboxHost {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

struct ForbiddenFormVisitor<'a> {
    interner: &'a Interner,
    violation: Option<String>,
}

const FORBIDDEN_IDENTIFIERS: &[&str] = &[
    "eval",
    "Function",
    "require",
    "globalThis",
    "Reflect",
    "Proxy",
    "process",
    "Buffer",
    "module",
    "exports",
];

const FORBIDDEN_PROPERTIES: &[&str] = &[
    "constructor",
    "__proto__",
    "exports",
    "getPrototypeOf",
    "setPrototypeOf",
];

impl<'ast> Visitor<'ast> for ForbiddenFormVisitor<'_> {
    type BreakTy = ();

    fn visit_identifier(&mut self, node: &'ast Identifier) -> ControlFlow<Self::BreakTy> {
        let name = self.interner.resolve_expect(node.sym()).to_string();
        if FORBIDDEN_IDENTIFIERS.contains(&name.as_str()) {
            self.violation = Some(format!("forbidden identifier: {name}"));
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn visit_property_access(&mut self, node: &'ast PropertyAccess) -> ControlFlow<Self::BreakTy> {
        if let PropertyAccess::Simple(simple) = node {
            if let PropertyAccessField::Const(sym) = simple.field() {
                let name = self.interner.resolve_expect(*sym).to_string();
                if FORBIDDEN_PROPERTIES.contains(&name.as_str()) {
                    self.violation = Some(format!("forbidden property access: .{name}"));
                    return ControlFlow::Break(());
                }
            }
        }
        node.visit_with(self)
    }
}

/// Registers the single `__atpCall(id, kind, operation, args)` global the
/// rewriter's wrapped call sites invoke. On a replay hit it returns the
/// stored result; otherwise it records the pause request into `pause_slot`
/// and throws the pause marker, which the guest's un-caught propagation
/// unwinds through (§4.4 "Suspended cooperation"). Also registers
/// `__atpCallBatch(id, items)` for a parallel-join lowering (§4.3 point 3):
/// `items` is an array of `{id, kind, operation, args}`, each resolved
/// independently through the same `replay` hook, with the combined result
/// returned as a single JS array (or a single pause covering the whole
/// batch, never a partial one).
#[allow(clippy::too_many_arguments)]
fn install_atp_call(
    context: &mut Context,
    pause_slot: Rc<RefCell<Option<PauseRequest>>>,
    llm_call_count: Rc<RefCell<u32>>,
    max_llm_calls: u32,
    memory_used: Rc<RefCell<u64>>,
    max_heap_bytes: u64,
    deadline: Instant,
    replay: impl Fn(&str, CallbackKind, &str, &serde_json::Value) -> ReplayLookup + 'static,
) -> Result<(), JsError> {
    let replay = Rc::new(replay);

    fn track_bytes(memory_used: &Rc<RefCell<u64>>, max_heap_bytes: u64, value: &serde_json::Value) -> Result<(), JsError> {
        let size = serde_json::to_vec(value).map(|b| b.len() as u64).unwrap_or(0);
        let mut used = memory_used.borrow_mut();
        *used += size;
        if *used > max_heap_bytes {
            return Err(JsError::from_opaque(JsValue::from(js_string!(MEMORY_LIMIT_MARKER))));
        }
        Ok(())
    }

    let single = NativeFunction::from_copy_closure_with_captures(
        move |_this, args, captures, context| {
            let (pause_slot, llm_call_count, replay, memory_used, deadline) = captures;
            if Instant::now() > *deadline {
                return Err(JsError::from_opaque(JsValue::from(js_string!("__ATP_TIMEOUT_MARKER__"))));
            }
            let construct_id = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            let kind_str = args.get(1).and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            let operation = args.get(2).and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            let payload_value = args.get(3).cloned().unwrap_or(JsValue::undefined());
            let payload = js_value_to_json(&payload_value, context).unwrap_or(serde_json::Value::Null);

            let kind = kind_from_str(&kind_str);

            match replay(&construct_id, kind, &operation, &payload) {
                ReplayLookup::Resolved(result) => {
                    if kind == CallbackKind::Llm {
                        *llm_call_count.borrow_mut() += 1;
                        if *llm_call_count.borrow() > max_llm_calls {
                            return Err(JsError::from_opaque(JsValue::from(js_string!("llm_calls_exceeded"))));
                        }
                    }
                    track_bytes(memory_used, max_heap_bytes, &result)?;
                    json_to_js_value(&result, context)
                }
                ReplayLookup::Unresolved => {
                    track_bytes(memory_used, max_heap_bytes, &payload)?;
                    *pause_slot.borrow_mut() = Some(PauseRequest { construct_id, kind, operation, payload });
                    Err(JsError::from_opaque(JsValue::from(js_string!(PAUSE_MARKER))))
                }
            }
        },
        (pause_slot.clone(), llm_call_count.clone(), replay.clone(), memory_used.clone(), deadline),
    );

    context
        .register_global_property(js_string!("__atpCall"), JsValue::undefined(), Attribute::all())
        .ok();
    context.global_object().set(js_string!("__atpCall"), single, false, context)?;

    let batch = NativeFunction::from_copy_closure_with_captures(
        move |_this, args, captures, context| {
            let (pause_slot, llm_call_count, replay, memory_used, deadline) = captures;
            if Instant::now() > *deadline {
                return Err(JsError::from_opaque(JsValue::from(js_string!("__ATP_TIMEOUT_MARKER__"))));
            }
            let batch_id = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            let items_value = args.get(1).cloned().unwrap_or(JsValue::undefined());
            let items = js_value_to_json(&items_value, context).unwrap_or(serde_json::Value::Array(Vec::new()));
            let items_array = items.as_array().cloned().unwrap_or_default();

            match replay(&batch_id, CallbackKind::Batch, "batchParallel", &items) {
                ReplayLookup::Resolved(result) => {
                    let results = result.as_array().cloned().unwrap_or_default();
                    let llm_items = items_array
                        .iter()
                        .filter(|item| item.get("kind").and_then(|v| v.as_str()) == Some("llm"))
                        .count() as u32;
                    *llm_call_count.borrow_mut() += llm_items;
                    if *llm_call_count.borrow() > max_llm_calls {
                        return Err(JsError::from_opaque(JsValue::from(js_string!("llm_calls_exceeded"))));
                    }
                    track_bytes(memory_used, max_heap_bytes, &result)?;
                    json_to_js_value(&serde_json::Value::Array(results), context)
                }
                ReplayLookup::Unresolved => {
                    track_bytes(memory_used, max_heap_bytes, &items)?;
                    *pause_slot.borrow_mut() = Some(PauseRequest {
                        construct_id: batch_id,
                        kind: CallbackKind::Batch,
                        operation: "batchParallel".to_string(),
                        payload: items,
                    });
                    Err(JsError::from_opaque(JsValue::from(js_string!(PAUSE_MARKER))))
                }
            }
        },
        (pause_slot, llm_call_count, replay, memory_used, deadline),
    );
    context
        .register_global_property(js_string!("__atpCallBatch"), JsValue::undefined(), Attribute::all())
        .ok();
    context.global_object().set(js_string!("__atpCallBatch"), batch, false, context)?;

    Ok(())
}

fn kind_from_str(kind_str: &str) -> CallbackKind {
    match kind_str {
        "llm" => CallbackKind::Llm,
        "approval" => CallbackKind::Approval,
        "embedding" => CallbackKind::Embedding,
        "batch" => CallbackKind::Batch,
        _ => CallbackKind::Tool,
    }
}

/// Registers `__atpLoopIter(loop_id)`, injected by the rewriter at the head
/// of every recognised `for`/`while` loop body. Advances that loop's
/// [`LoopCheckpoint`] and fails the run once `MAX_LOOP_ITERATIONS` is
/// crossed — the guard boa's own `loop_iteration_limit` backstops globally,
/// but this one is scoped per recognised loop construct and is what
/// actually reads `LoopCheckpoint`/`MAX_LOOP_ITERATIONS` from the rewrite
/// domain model instead of leaving them unused.
fn install_atp_loop_iter(
    context: &mut Context,
    checkpoints: Rc<RefCell<HashMap<String, LoopCheckpoint>>>,
    deadline: Instant,
) -> Result<(), JsError> {
    let native = NativeFunction::from_copy_closure_with_captures(
        move |_this, args, captures, _context| {
            let (checkpoints, deadline) = captures;
            if Instant::now() > *deadline {
                return Err(JsError::from_opaque(JsValue::from(js_string!("__ATP_TIMEOUT_MARKER__"))));
            }
            let loop_id = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            let mut map = checkpoints.borrow_mut();
            let checkpoint = map.entry(loop_id.clone()).or_insert_with(|| LoopCheckpoint::new(loop_id.clone()));
            checkpoint.record_iteration(serde_json::Value::Null);
            if checkpoint.current_index as u64 > MAX_LOOP_ITERATIONS {
                return Err(JsError::from_opaque(JsValue::from(js_string!(LOOP_LIMIT_MARKER))));
            }
            Ok(JsValue::undefined())
        },
        (checkpoints, deadline),
    );
    context
        .register_global_property(js_string!("__atpLoopIter"), JsValue::undefined(), Attribute::all())
        .ok();
    context.global_object().set(js_string!("__atpLoopIter"), native, false, context)?;
    Ok(())
}

/// Installs the `atp` global object and its `cache` sub-object, the one
/// namespace that is a real synchronous capability (not a pausing call the
/// rewriter lowers away) and so needs an actual JS object surface rather
/// than textual recognition. `atp.llm`/`atp.approval`/`atp.embedding` are
/// deliberately absent here: they only ever appear in guest source before
/// the rewriter runs.
fn install_atp_namespace(context: &mut Context, cache: Option<Arc<CacheBridge>>) -> Result<(), JsError> {
    context.eval(Source::from_bytes(b"globalThis.atp = globalThis.atp || {}; atp.cache = {};"))?;

    let Some(cache) = cache else { return Ok(()) };

    let atp = context.global_object().get(js_string!("atp"), context)?;
    let atp_obj = atp
        .as_object()
        .ok_or_else(|| JsError::from_opaque(JsValue::from(js_string!("atp global is not an object"))))?
        .clone();
    let cache_value = atp_obj.get(js_string!("cache"), context)?;
    let cache_obj = cache_value
        .as_object()
        .ok_or_else(|| JsError::from_opaque(JsValue::from(js_string!("atp.cache is not an object"))))?
        .clone();

    let get_cache = cache.clone();
    let get_fn = NativeFunction::from_copy_closure_with_captures(
        move |_this, args, cache, context| {
            let key = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            match cache.get(&key) {
                Some(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).to_string();
                    let value = serde_json::from_str::<serde_json::Value>(&text).unwrap_or(serde_json::Value::Null);
                    json_to_js_value(&value, context)
                }
                None => Ok(JsValue::undefined()),
            }
        },
        get_cache,
    );
    cache_obj.set(js_string!("get"), get_fn, false, context)?;

    let set_cache = cache.clone();
    let set_fn = NativeFunction::from_copy_closure_with_captures(
        move |_this, args, cache, context| {
            let key = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            let value_arg = args.get(1).cloned().unwrap_or(JsValue::undefined());
            let value = js_value_to_json(&value_arg, context).unwrap_or(serde_json::Value::Null);
            let ttl_secs = args.get(2).and_then(|v| v.as_number()).map(|n| n as u64);
            let bytes = serde_json::to_vec(&value).unwrap_or_default();
            cache.set(&key, bytes, ttl_secs);
            Ok(JsValue::undefined())
        },
        set_cache,
    );
    cache_obj.set(js_string!("set"), set_fn, false, context)?;

    let has_cache = cache.clone();
    let has_fn = NativeFunction::from_copy_closure_with_captures(
        move |_this, args, cache, _context| {
            let key = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            Ok(JsValue::from(cache.has(&key)))
        },
        has_cache,
    );
    cache_obj.set(js_string!("has"), has_fn, false, context)?;

    let delete_cache = cache;
    let delete_fn = NativeFunction::from_copy_closure_with_captures(
        move |_this, args, cache, _context| {
            let key = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
            cache.delete(&key);
            Ok(JsValue::undefined())
        },
        delete_cache,
    );
    cache_obj.set(js_string!("delete"), delete_fn, false, context)?;

    Ok(())
}

fn json_to_js_value(value: &serde_json::Value, context: &mut Context) -> Result<JsValue, JsError> {
    let text = serde_json::to_string(value).map_err(|e| JsError::from_opaque(JsValue::from(js_string!(e.to_string()))))?;
    context.eval(Source::from_bytes(format!("({text})").as_bytes()))
}

fn js_value_to_json(value: &JsValue, context: &mut Context) -> Result<serde_json::Value, String> {
    let json_global = context
        .global_object()
        .get(js_string!("JSON"), context)
        .map_err(|e| e.to_string())?;
    let json_object = json_global.as_object().ok_or("JSON global missing")?;
    let stringify = json_object
        .get(js_string!("stringify"), context)
        .map_err(|e| e.to_string())?;
    let stringify_fn = stringify.as_callable().ok_or("JSON.stringify not callable")?;
    let result = stringify_fn
        .call(&JsValue::undefined(), &[value.clone()], context)
        .map_err(|e| e.to_string())?;
    if result.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    let text = result
        .as_string()
        .ok_or("JSON.stringify did not return a string")?
        .to_std_string_escaped();
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_secs(5),
            max_heap_bytes: 64 * 1024 * 1024,
            max_llm_calls: 16,
        }
    }

    #[test]
    fn test_simple_return_completes() {
        let host = SandboxHost::new();
        let outcome = host.execute("2 + 2", &limits(), None, |_, _, _, _| ReplayLookup::Unresolved);
        match outcome {
            SandboxOutcome::Completed(v, _) => assert_eq!(v, serde_json::json!(4)),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_pausing_call_pauses() {
        let host = SandboxHost::new();
        let source = r#"__atpCall("c1", "llm", "atp.llm.call", [{"prompt":"A"}])"#;
        let outcome = host.execute(source, &limits(), None, |_, _, _, _| ReplayLookup::Unresolved);
        match outcome {
            SandboxOutcome::Paused(req, _) => {
                assert_eq!(req.construct_id, "c1");
                assert_eq!(req.kind, CallbackKind::Llm);
            }
            other => panic!("expected pause, got {other:?}"),
        }
    }

    #[test]
    fn test_resolved_pausing_call_returns_replayed_value() {
        let host = SandboxHost::new();
        let source = r#"__atpCall("c1", "llm", "atp.llm.call", [{"prompt":"A"}])"#;
        let outcome = host.execute(source, &limits(), None, |_, _, _, _| ReplayLookup::Resolved(serde_json::json!("A")));
        match outcome {
            SandboxOutcome::Completed(v, _) => assert_eq!(v, serde_json::json!("A")),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_forbidden_form_rejected_before_execution() {
        let host = SandboxHost::new();
        let outcome = host.execute("eval('2+2')", &limits(), None, |_, _, _, _| ReplayLookup::Unresolved);
        assert!(matches!(outcome, SandboxOutcome::Error(SandboxError::SecurityViolation(_), _)));
    }

    #[test]
    fn test_forbidden_property_access_rejected() {
        let host = SandboxHost::new();
        let outcome = host.execute("({}).constructor.constructor", &limits(), None, |_, _, _, _| ReplayLookup::Unresolved);
        assert!(matches!(outcome, SandboxOutcome::Error(SandboxError::SecurityViolation(_), _)));
    }

    #[test]
    fn test_identifier_containing_forbidden_substring_is_not_flagged() {
        let host = SandboxHost::new();
        let outcome = host.execute("let processedCount = 1; processedCount + 1", &limits(), None, |_, _, _, _| {
            ReplayLookup::Unresolved
        });
        assert!(matches!(outcome, SandboxOutcome::Completed(_, _)));
    }

    #[test]
    fn test_batch_pauses_with_all_items_when_unresolved() {
        let host = SandboxHost::new();
        let source = r#"__atpCallBatch("b1", [{"id":"0","kind":"llm","operation":"atp.llm.call","args":[{"prompt":"A"}]}])"#;
        let outcome = host.execute(source, &limits(), None, |_, kind, op, _| {
            assert_eq!(op, "batchParallel");
            assert_eq!(kind, CallbackKind::Batch);
            ReplayLookup::Unresolved
        });
        assert!(matches!(outcome, SandboxOutcome::Paused(_, _)));
    }

    #[test]
    fn test_batch_resolved_returns_array_of_results() {
        let host = SandboxHost::new();
        let source = r#"__atpCallBatch("b1", [{"id":"0","kind":"llm","operation":"atp.llm.call","args":[{}]}])"#;
        let outcome = host.execute(source, &limits(), None, |_, _, _, _| ReplayLookup::Resolved(serde_json::json!(["A"])));
        match outcome {
            SandboxOutcome::Completed(v, _) => assert_eq!(v, serde_json::json!(["A"])),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_memory_ceiling_trips_on_oversized_payload() {
        let host = SandboxHost::new();
        let tiny_limits = SandboxLimits { timeout: Duration::from_secs(5), max_heap_bytes: 4, max_llm_calls: 16 };
        let source = r#"__atpCall("c1", "llm", "atp.llm.call", [{"prompt":"A"}])"#;
        let outcome = host.execute(source, &tiny_limits, None, |_, _, _, _| ReplayLookup::Unresolved);
        assert!(matches!(outcome, SandboxOutcome::Error(SandboxError::MemoryExceeded, _)));
    }
}
