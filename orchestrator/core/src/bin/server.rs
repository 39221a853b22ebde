// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Boots the ATP server: reads [`BootConfig`] from the environment, wires
//! every component, and serves the `/api/*` surface over HTTP.

use std::sync::Arc;

use atp_core::application::cache_service::CacheService;
use atp_core::application::catalog_service::CatalogService;
use atp_core::application::pec::PausableExecutionCore;
use atp_core::application::policy_engine::PolicyEngine;
use atp_core::application::rewriter::ProgramRewriter;
use atp_core::application::sandbox::SandboxHost;
use atp_core::application::session_service::StandardSessionService;
use atp_core::domain::tool_catalog::ToolCatalog;
use atp_core::infrastructure::cache::InMemoryCacheBackend;
use atp_core::infrastructure::config::BootConfig;
use atp_core::infrastructure::paused_state_repository::CachePausedStateRepository;
use atp_core::infrastructure::session_repository::InMemorySessionRepository;
use atp_core::presentation::api::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .compact()
        .init();

    let config = BootConfig::from_env()?;
    tracing::info!(bind_addr = %config.bind_addr, "booting atp-core");

    let cache_backend: Arc<dyn atp_core::domain::cache::CacheBackend> = Arc::new(InMemoryCacheBackend::new());

    let session_service = Arc::new(StandardSessionService::new(
        Arc::new(InMemorySessionRepository::new(cache_backend.clone())),
        config.signing_secret.as_bytes(),
    ));

    // The catalog starts empty: populating it from OpenAPI/MCP registrations
    // is deployment-specific and happens out of process, not at boot.
    let catalog_service = Arc::new(CatalogService::new(ToolCatalog { groups: Vec::new() }, Vec::new()));

    let cache_service = Arc::new(CacheService::new(cache_backend.clone()));

    let paused_state_repository = Arc::new(CachePausedStateRepository::new(
        cache_backend,
        config.pause_ttl_secs,
        config.max_pause_duration_secs,
    ));
    let pec = Arc::new(PausableExecutionCore::new(
        Arc::new(ProgramRewriter::new(config.rewrite_cache_capacity)),
        Arc::new(SandboxHost::new()),
        paused_state_repository,
        Arc::new(PolicyEngine::with_defaults()),
        cache_service.clone(),
    ));

    if let Err(err) = atp_core::infrastructure::metrics::install_prometheus_recorder() {
        tracing::warn!(%err, "prometheus recorder already installed");
    }

    let state = Arc::new(AppState { session_service, catalog_service, cache_service, pec });
    let router = api::app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(bind_addr = %config.bind_addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
