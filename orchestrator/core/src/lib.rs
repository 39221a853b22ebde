// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # atp-core
//!
//! The central orchestration crate for the Agent Tool Protocol server. It owns
//! the domain model, application use-cases, infrastructure wiring, and the
//! HTTP presentation surface for every component of the system.
//!
//! ## Components Implemented
//!
//! | Component | Domain/application files |
//! |---|---|
//! | **C1 Provenance Registry** | [`domain::provenance`] |
//! | **C2 Tool Catalog** | [`domain::tool_catalog`], [`application::catalog_service`] |
//! | **C3 Session/Token Service** | [`domain::session`], [`application::session_service`] |
//! | **C4 Paused-State Store** | [`infrastructure::paused_state_repository`] |
//! | **C5 Cache API** | [`domain::cache`], [`application::cache_service`], [`infrastructure::cache`] |
//! | **C6 Program Rewriter** | [`application::rewriter`] |
//! | **C7 Sandbox Host** | [`application::sandbox`] |
//! | **C8 Pausable Execution Core** | [`domain::execution`], [`application::pec`] |
//! | **C9 Policy Engine** | [`domain::policy`], [`application::policy_engine`] |
//! | **C10 Explorer/Search** | [`application::catalog_service`] |
//! | **C11 HTTP Presentation Layer** | [`presentation::api`] |
//! | **C12 Boot Config** | [`infrastructure::config`] |
//! | **C13 Metrics** | [`infrastructure::metrics`] |
//!
//! ## Layer Structure
//!
//! ```text
//! presentation/   ← HTTP API (axum)
//!     ↓
//! application/    ← Use-cases, service traits, orchestration
//!     ↓
//! domain/         ← Aggregates, value objects, repository traits
//!     ↓
//! infrastructure/ ← Cache-backed repositories, boot config, metrics
//! ```

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
