// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent lifecycle states and the append-only transition log.
//!
//! The transition log is the source of truth; an agent's `status` field is a
//! projection of the latest log record and is only ever updated together
//! with a log append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states. `Terminated` is terminal; everything else may shut
/// down into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Spawning,
    Idle,
    Running,
    Degraded,
    Failed,
    Quarantined,
    Terminated,
}

impl AgentStatus {
    /// The legal transition table. Anything not listed here is rejected
    /// unless the caller forces the transition.
    ///
    /// - `SPAWNING -> IDLE`
    /// - `IDLE -> RUNNING`
    /// - `RUNNING -> IDLE | DEGRADED | FAILED`
    /// - `DEGRADED -> IDLE | FAILED | QUARANTINED`
    /// - `FAILED -> QUARANTINED | TERMINATED`
    /// - any non-terminal state `-> TERMINATED`
    pub fn can_transition_to(&self, to: AgentStatus) -> bool {
        use AgentStatus::*;
        if *self == Terminated {
            return false;
        }
        if to == Terminated {
            return true;
        }
        matches!(
            (*self, to),
            (Spawning, Idle)
                | (Idle, Running)
                | (Running, Idle)
                | (Running, Degraded)
                | (Running, Failed)
                | (Degraded, Idle)
                | (Degraded, Failed)
                | (Degraded, Quarantined)
                | (Failed, Quarantined)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Terminated)
    }

    /// Currently executing a task.
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Running)
    }

    /// Healthy enough to participate in the fleet (possibly degraded).
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            AgentStatus::Idle | AgentStatus::Running | AgentStatus::Degraded
        )
    }

    /// Eligible for new work. The dispatcher only assigns to idle agents.
    pub fn is_assignable(&self) -> bool {
        matches!(self, AgentStatus::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Spawning => "SPAWNING",
            AgentStatus::Idle => "IDLE",
            AgentStatus::Running => "RUNNING",
            AgentStatus::Degraded => "DEGRADED",
            AgentStatus::Failed => "FAILED",
            AgentStatus::Quarantined => "QUARANTINED",
            AgentStatus::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record in the append-only transition log. Records are never mutated
/// or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    /// Log position, stamped by the store on append.
    #[serde(default)]
    pub sequence: u64,
    pub agent_id: AgentId,
    /// `None` only for the registration seed record.
    pub from_status: Option<AgentStatus>,
    pub to_status: AgentStatus,
    pub reason: String,
    pub triggered_by: String,
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub forced: bool,
    pub transitioned_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Parameters for a requested transition. The store fills in `from_status`
/// from the current projection at append time.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub agent_id: AgentId,
    pub to_status: AgentStatus,
    pub reason: String,
    pub triggered_by: String,
    pub task_id: Option<TaskId>,
    pub metadata: Option<serde_json::Value>,
    /// Guardian override: bypasses the legality table but still appends an
    /// audit record.
    pub forced: bool,
}

impl TransitionRequest {
    pub fn new(
        agent_id: AgentId,
        to_status: AgentStatus,
        reason: impl Into<String>,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            agent_id,
            to_status,
            reason: reason.into(),
            triggered_by: triggered_by.into(),
            task_id: None,
            metadata: None,
            forced: false,
        }
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }
}

/// Outcome of an atomic log append. `Rejected` carries the pair that was
/// refused so errors can name it.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(StatusTransition),
    Rejected {
        from: AgentStatus,
        to: AgentStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub capabilities: Vec<String>,
    /// Projection of the latest transition record.
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            name: name.into(),
            capabilities,
            status: AgentStatus::Spawning,
            registered_at: now,
            updated_at: now,
        }
    }
}
