// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP Presentation Layer (C11) — binds C2/C3/C5/C8/C10 to the `/api/*`
//! surface. Routes carry no business logic: every handler does
//! request/response shaping only and delegates to an application service.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::application::cache_service::CacheService;
use crate::application::catalog_service::CatalogService;
use crate::application::pec::{ExecuteRequest, ExecutionStatsView, PausableExecutionCore, PecError, PecOutcome, PendingCallback, ResumeRequest};
use crate::application::session_service::{SessionService, SessionServiceError};
use crate::domain::execution::{ExecutionConfig, ExecutionError, ExecutionId, ExecutionStatus};
use crate::domain::session::{ClientId, ClientInfo, ClientResidentTool};

pub struct AppState {
    pub session_service: Arc<dyn SessionService>,
    pub catalog_service: Arc<CatalogService>,
    pub cache_service: Arc<CacheService>,
    pub pec: Arc<PausableExecutionCore>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/init", post(init))
        .route("/api/info", get(info))
        .route("/api/definitions", get(definitions))
        .route("/api/search", post(search))
        .route("/api/explore", post(explore))
        .route("/api/execute", post(execute))
        .route("/api/execute-stream", post(execute_stream))
        .route("/api/resume/:execution_id", post(resume))
        .with_state(state)
}

type ErrorResponse = (StatusCode, Json<serde_json::Value>);

/// `Authorization: Bearer <token>` + `X-Client-ID: <clientId>`, verified and
/// rotated on every authenticated call. Returns the caller's `ClientId` and
/// the rotated-token response headers to attach.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(ClientId, HeaderMap), ErrorResponse> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| unauthorized("missing Authorization header"))?;
    let client_id: ClientId = headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing X-Client-ID header"))?
        .parse()
        .map_err(|_| unauthorized("malformed X-Client-ID header"))?;

    let rotated = state.session_service.verify(client_id, token).await.map_err(session_error_response)?;

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&rotated.token) {
        response_headers.insert("x-atp-token", value);
    }
    if let Ok(value) = HeaderValue::from_str(&rotated.expires_at.to_rfc3339()) {
        response_headers.insert("x-atp-token-expires", value);
    }
    Ok((client_id, response_headers))
}

/// Best-effort scope resolution shared by every read-only catalog endpoint:
/// an authenticated caller's own scopes, or the fallback set for anyone
/// without (or with expired) credentials (§7 Supplement).
async fn resolve_scopes(state: &AppState, headers: &HeaderMap) -> Vec<String> {
    match authenticate(state, headers).await {
        Ok((client_id, _)) => state.session_service.get_session(client_id).await.map(|s| s.scopes).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

/// A next-step hint attached to every HTTP error body (§6): short enough to
/// act on directly, specific to the error code rather than a generic
/// "try again".
fn suggestion_for_code(code: &str) -> &'static str {
    match code {
        "unauthorized" => "Include a valid `Authorization: Bearer <token>` and `X-Client-ID` header, obtained from POST /api/init.",
        "forbidden" => "This resource belongs to a different client; resume or act on it using the client that created it.",
        "not_found" => "Check the path or executionId for typos, or that it hasn't already completed and been cleaned up.",
        "bad_request" => "Check the request body against the documented shape for this endpoint.",
        _ => "Retry the request; if the problem persists, check the server logs for this request's details.",
    }
}

fn error_payload(message: impl Into<String>, code: &str) -> serde_json::Value {
    json!({"error": {"message": message.into(), "code": code, "suggestion": suggestion_for_code(code)}})
}

fn unauthorized(message: &str) -> ErrorResponse {
    (StatusCode::UNAUTHORIZED, Json(error_payload(message, "unauthorized")))
}

fn session_error_response(err: SessionServiceError) -> ErrorResponse {
    let (status, code) = match err {
        SessionServiceError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        _ => (StatusCode::UNAUTHORIZED, "unauthorized"),
    };
    (status, Json(error_payload(err.to_string(), code)))
}

#[derive(Deserialize)]
struct InitRequest {
    #[serde(default, rename = "clientInfo")]
    client_info: ClientInfo,
    #[serde(default)]
    guidance: Option<String>,
    #[serde(default)]
    tools: Vec<ClientResidentTool>,
}

async fn init(State(state): State<Arc<AppState>>, Json(req): Json<InitRequest>) -> impl IntoResponse {
    match state.session_service.init_client(req.client_info, req.guidance, req.tools).await {
        Ok(result) => Json(json!({
            "clientId": result.client_id.to_string(),
            "token": result.token,
            "expiresAt": result.expires_at,
            "rotateAt": result.rotate_at,
        }))
        .into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, Json(error_payload(err.to_string(), "bad_request"))).into_response(),
    }
}

async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "name": "atp-core",
        "toolGroupCount": state.catalog_service.catalog().groups.len(),
        "fallbackScopes": state.catalog_service.fallback_scopes(),
    }))
}

async fn definitions(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let scopes = resolve_scopes(&state, &headers).await;

    let api_groups: Vec<String> = state.catalog_service.catalog().groups.iter().map(|g| g.path()).collect();

    Json(json!({
        "typescriptLike": state.catalog_service.render_typescript_like(&scopes),
        "apiGroups": api_groups,
    }))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default, rename = "apiGroups")]
    api_groups: Option<Vec<String>>,
    #[serde(default = "default_max_results", rename = "maxResults")]
    max_results: usize,
}

fn default_max_results() -> usize {
    20
}

async fn search(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<SearchRequest>) -> impl IntoResponse {
    let scopes = resolve_scopes(&state, &headers).await;
    let matches = state.catalog_service.search(&req.query, req.api_groups.as_deref(), &scopes, req.max_results);
    Json(json!({ "matches": matches }))
}

#[derive(Deserialize)]
struct ExploreRequest {
    path: String,
}

async fn explore(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<ExploreRequest>) -> impl IntoResponse {
    let scopes = resolve_scopes(&state, &headers).await;
    match state.catalog_service.explore(&req.path, &scopes) {
        Some(result) => Json(serde_json::to_value(result).unwrap_or(serde_json::Value::Null)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(error_payload("no such path", "not_found"))).into_response(),
    }
}

#[derive(Deserialize)]
struct ExecuteBody {
    code: String,
    #[serde(default)]
    config: ExecutionConfig,
}

#[derive(Serialize)]
struct StatsView {
    duration: u64,
    #[serde(rename = "memoryUsed")]
    memory_used: u64,
    #[serde(rename = "llmCallsCount")]
    llm_calls_count: u32,
    #[serde(rename = "approvalCallsCount")]
    approval_calls_count: u32,
    #[serde(rename = "httpCallsCount")]
    http_calls_count: u32,
}

impl From<ExecutionStatsView> for StatsView {
    fn from(s: ExecutionStatsView) -> Self {
        Self {
            duration: s.duration_ms,
            memory_used: s.memory_used_bytes,
            llm_calls_count: s.llm_calls_count,
            approval_calls_count: s.approval_calls_count,
            http_calls_count: s.tool_calls_count,
        }
    }
}

#[derive(Serialize)]
struct ExecutionResultView {
    #[serde(rename = "executionId")]
    execution_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "needsCallback")]
    needs_callback: Option<PendingCallback>,
    stats: StatsView,
}

fn status_code_for(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Paused => "paused",
        ExecutionStatus::Timeout => "timeout",
        ExecutionStatus::MemoryExceeded => "memory_exceeded",
        ExecutionStatus::LlmCallsExceeded => "llm_calls_exceeded",
        ExecutionStatus::SecurityViolation => "security_violation",
        ExecutionStatus::ParseError => "parse_error",
        ExecutionStatus::NetworkError => "network_error",
        ExecutionStatus::LoopDetected => "loop_detected",
    }
}

/// Targeted next-step advice per terminal failure status (§6), distinct
/// from the generic HTTP-envelope suggestions in [`suggestion_for_code`]
/// since an execution failure is a business outcome, not a malformed
/// request.
fn suggestion_for_status(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Timeout => "Raise `config.timeoutMs` or reduce the work done before the next pausing call.",
        ExecutionStatus::MemoryExceeded => "Raise `config.maxHeapBytes` or have the program stream/process less data per call.",
        ExecutionStatus::LlmCallsExceeded => "Raise `config.maxLlmCalls` or have the program make fewer `atp.llm` calls per run.",
        ExecutionStatus::SecurityViolation => "Review the blocked call against the configured policies; this is not a retryable error.",
        ExecutionStatus::ParseError => "Fix the syntax error in the submitted program and call /api/execute again.",
        ExecutionStatus::NetworkError => "Retry the call; if it persists, check connectivity to the callback's downstream service.",
        ExecutionStatus::LoopDetected => "The replayed run diverged from its recorded history or exceeded the loop-iteration ceiling; do not resume, start a fresh execution.",
        ExecutionStatus::Completed | ExecutionStatus::Paused | ExecutionStatus::Failed => {
            "Retry the request; if the problem persists check the server logs for this execution id."
        }
    }
}

fn view_from_outcome(execution_id: ExecutionId, outcome: PecOutcome, stats: ExecutionStatsView) -> ExecutionResultView {
    let stats = StatsView::from(stats);
    match outcome {
        PecOutcome::Completed { result } => ExecutionResultView {
            execution_id: execution_id.to_string(),
            status: status_code_for(ExecutionStatus::Completed),
            result: Some(result),
            error: None,
            needs_callback: None,
            stats,
        },
        PecOutcome::Paused { needs_callback } => ExecutionResultView {
            execution_id: execution_id.to_string(),
            status: status_code_for(ExecutionStatus::Paused),
            result: None,
            error: None,
            needs_callback: Some(needs_callback),
            stats,
        },
        PecOutcome::Failed { status, message } => ExecutionResultView {
            execution_id: execution_id.to_string(),
            status: status_code_for(status),
            result: None,
            error: Some(json!({
                "message": message,
                "code": status_code_for(status),
                "retryable": matches!(status, ExecutionStatus::Timeout | ExecutionStatus::NetworkError),
                "suggestion": suggestion_for_status(status),
            })),
            needs_callback: None,
            stats,
        },
    }
}

fn pec_error_response(err: PecError) -> ErrorResponse {
    let (status, code) = match &err {
        PecError::Execution(ExecutionError::InvalidConfig(_)) => (StatusCode::BAD_REQUEST, "bad_request"),
        PecError::Execution(ExecutionError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
        PecError::Execution(ExecutionError::Forbidden(_)) => (StatusCode::FORBIDDEN, "forbidden"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    (status, Json(error_payload(err.to_string(), code)))
}

async fn execute(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<ExecuteBody>) -> impl IntoResponse {
    let (client_id, auth_headers) = match authenticate(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return err.into_response(),
    };

    match state.pec.execute(ExecuteRequest { client_id, source: body.code, config: body.config }).await {
        Ok(view) => (auth_headers, Json(view_from_outcome(view.execution_id, view.outcome, view.stats))).into_response(),
        Err(err) => pec_error_response(err).into_response(),
    }
}

/// One sub-call's resolved result inside a batched (`Promise.all`) pause
/// (§4.3 point 3). `id` matches the index the rewriter assigned each
/// sub-call when it lowered the join to `__atpCallBatch`.
#[derive(Deserialize)]
struct BatchResultItem {
    id: String,
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct ResumeBody {
    #[serde(default)]
    result: serde_json::Value,
    /// Present instead of `result` when resuming a batched pause: one entry
    /// per sub-call, reassembled here into the ordered array `result` would
    /// otherwise carry directly.
    #[serde(default)]
    results: Option<Vec<BatchResultItem>>,
}

impl ResumeBody {
    fn resolved_result(self) -> serde_json::Value {
        match self.results {
            Some(mut items) => {
                items.sort_by_key(|item| item.id.parse::<usize>().unwrap_or(usize::MAX));
                serde_json::Value::Array(items.into_iter().map(|item| item.result).collect())
            }
            None => self.result,
        }
    }
}

async fn resume(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(execution_id): Path<String>,
    Json(body): Json<ResumeBody>,
) -> impl IntoResponse {
    let (client_id, auth_headers) = match authenticate(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return err.into_response(),
    };

    let execution_id: ExecutionId = match execution_id.parse() {
        Ok(id) => id,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(error_payload("malformed executionId", "bad_request"))).into_response(),
    };
    let result = body.resolved_result();

    match state.pec.resume(ResumeRequest { execution_id, client_id, result }).await {
        Ok(view) => (auth_headers, Json(view_from_outcome(view.execution_id, view.outcome, view.stats))).into_response(),
        Err(err) => pec_error_response(err).into_response(),
    }
}

/// Single-shot event stream: `start`, then `result`/`error` once the
/// (synchronous) execute call resolves. There is no intermediate `progress`
/// event today since the Core reports only a run's terminal outcome, not
/// mid-run ticks.
async fn execute_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ExecuteBody>,
) -> impl IntoResponse {
    let (client_id, _auth_headers) = match authenticate(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return err.into_response(),
    };

    let outcome = state.pec.execute(ExecuteRequest { client_id, source: body.code, config: body.config }).await;

    let events: Vec<Result<Event, std::convert::Infallible>> = match outcome {
        Ok(view) => {
            let event_type = match view.outcome {
                PecOutcome::Failed { .. } => "error",
                _ => "result",
            };
            let view_json = view_from_outcome(view.execution_id, view.outcome, view.stats);
            vec![
                Ok(Event::default().event("start").data(json!({"executionId": view_json.execution_id}).to_string())),
                Ok(Event::default().event(event_type).data(serde_json::to_string(&view_json).unwrap_or_default())),
            ]
        }
        Err(err) => vec![Ok(Event::default().event("error").data(error_payload(err.to_string(), "internal_error").to_string()))],
    };

    Sse::new(stream::iter(events)).keep_alive(KeepAlive::default()).into_response()
}
