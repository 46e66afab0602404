// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, value objects, and repository contracts for
//! the coordination contexts (tasks, locks, agent lifecycle, sync points,
//! joins, merges, patterns).

pub mod agent;
pub mod coordination;
pub mod error;
pub mod events;
pub mod lock;
pub mod pattern;
pub mod repository;
pub mod task;
