// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS Coordinator Core
//!
//! Multi-agent coordination engine: dependency-aware task scheduling,
//! sync points and fan-in joins with continuations, resource locks with
//! TTL expiry, and an event-sourced agent lifecycle state machine.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Coordination primitives behind the agent dispatcher

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod runtime;

pub use config::CoordinatorConfig;
pub use domain::*;
pub use runtime::Coordinator;
