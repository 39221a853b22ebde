// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cache;
pub mod config;
pub mod metrics;
pub mod paused_state_repository;
pub mod session_repository;
