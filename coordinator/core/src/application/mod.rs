// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod coordination;
pub mod lifecycle;
pub mod locks;
pub mod scheduler;

// Re-export services for convenience
pub use coordination::{AppliedPattern, CoordinationEngine, StandardCoordinationEngine};
pub use lifecycle::{AgentStateMachine, StandardAgentStateMachine};
pub use locks::{LockManager, StandardLockManager};
pub use scheduler::{StandardTaskScheduler, TaskScheduler, TaskSettlementHook};
