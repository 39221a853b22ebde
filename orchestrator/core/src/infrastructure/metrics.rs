// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Metrics (C13) — counters for the execution lifecycle events named in
//! §4.11, exported via `metrics-exporter-prometheus` the same way the
//! teacher wires its own Prometheus endpoint.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const EXECUTIONS_STARTED: &str = "atp_executions_started_total";
pub const EXECUTIONS_COMPLETED: &str = "atp_executions_completed_total";
pub const EXECUTIONS_PAUSED: &str = "atp_executions_paused_total";
pub const EXECUTIONS_RESUMED: &str = "atp_executions_resumed_total";
pub const EXECUTIONS_FAILED: &str = "atp_executions_failed_total";
pub const POLICY_BLOCKS: &str = "atp_policy_blocks_total";
pub const REWRITE_CACHE_HITS: &str = "atp_rewrite_cache_hits_total";
pub const REWRITE_CACHE_MISSES: &str = "atp_rewrite_cache_misses_total";
pub const EXECUTION_DURATION_MS: &str = "atp_execution_duration_ms";

/// Registers descriptions for every metric this crate emits and installs
/// the Prometheus recorder, returning the handle the `/metrics` route
/// renders from.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    describe_counter!(EXECUTIONS_STARTED, "Executions started via /api/execute");
    describe_counter!(EXECUTIONS_COMPLETED, "Executions that ran to completion");
    describe_counter!(EXECUTIONS_PAUSED, "Executions suspended on a pausing call");
    describe_counter!(EXECUTIONS_RESUMED, "Resume requests handled");
    describe_counter!(EXECUTIONS_FAILED, "Executions that terminated in an error status");
    describe_counter!(POLICY_BLOCKS, "Calls blocked by the policy engine");
    describe_counter!(REWRITE_CACHE_HITS, "Program rewrite cache hits");
    describe_counter!(REWRITE_CACHE_MISSES, "Program rewrite cache misses");
    describe_histogram!(EXECUTION_DURATION_MS, "Wall-clock duration of one sandbox run, in milliseconds");

    PrometheusBuilder::new().install_recorder()
}

pub fn record_execution_started() {
    counter!(EXECUTIONS_STARTED).increment(1);
}

pub fn record_execution_completed() {
    counter!(EXECUTIONS_COMPLETED).increment(1);
}

pub fn record_execution_paused() {
    counter!(EXECUTIONS_PAUSED).increment(1);
}

pub fn record_execution_resumed() {
    counter!(EXECUTIONS_RESUMED).increment(1);
}

pub fn record_execution_failed(status: &str) {
    counter!(EXECUTIONS_FAILED, "status" => status.to_string()).increment(1);
}

pub fn record_policy_block(policy: &str) {
    counter!(POLICY_BLOCKS, "policy" => policy.to_string()).increment(1);
}

pub fn record_rewrite_cache_hit() {
    counter!(REWRITE_CACHE_HITS).increment(1);
}

pub fn record_rewrite_cache_miss() {
    counter!(REWRITE_CACHE_MISSES).increment(1);
}

pub fn record_execution_duration_ms(duration_ms: f64) {
    histogram!(EXECUTION_DURATION_MS).record(duration_ms);
}
