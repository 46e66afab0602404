// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod memory;
pub mod pattern_registry;

pub use event_bus::{CoordinatorEvent, EventBus, EventBusError};
pub use pattern_registry::{PatternParser, PatternRegistry};
