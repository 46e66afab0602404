// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub Uuid);

impl TicketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. `Ord` follows urgency, so `Critical > High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    /// Completed or failed. Terminal tasks are retained for audit, never deleted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Terminal or blocked: the task can make no further progress on its own.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || matches!(self, TaskStatus::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Creation parameters for a task. Dependency edges are fixed here and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub ticket_id: TicketId,
    pub phase: String,
    pub task_type: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

impl NewTask {
    pub fn new(ticket_id: TicketId, phase: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            ticket_id,
            phase: phase.into(),
            task_type: task_type.into(),
            priority: TaskPriority::default(),
            dependencies: Vec::new(),
            required_capabilities: Vec::new(),
            input: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub ticket_id: TicketId,
    pub phase: String,
    pub task_type: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub dependencies: Vec<TaskId>,
    pub required_capabilities: Vec<String>,
    pub assigned_agent_id: Option<AgentId>,
    pub input: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Arrival order stamped by the task store; FIFO tie-break within a
    /// priority band.
    #[serde(default)]
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task status change: {from} -> {to}")]
    InvalidStatusChange { from: TaskStatus, to: TaskStatus },
}

impl Task {
    pub fn new(spec: NewTask) -> Self {
        let status = TaskStatus::Pending;
        Self {
            id: TaskId::new(),
            ticket_id: spec.ticket_id,
            phase: spec.phase,
            task_type: spec.task_type,
            priority: spec.priority,
            status,
            dependencies: spec.dependencies,
            required_capabilities: spec.required_capabilities,
            assigned_agent_id: None,
            input: spec.input,
            result: None,
            error: None,
            sequence: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// True when every required capability is present in `agent_capabilities`.
    pub fn matches_capabilities(&self, agent_capabilities: &[String]) -> bool {
        self.required_capabilities
            .iter()
            .all(|needed| agent_capabilities.iter().any(|have| have == needed))
    }

    pub fn assign(&mut self, agent_id: AgentId) -> Result<(), TaskError> {
        if self.status != TaskStatus::Pending {
            return Err(TaskError::InvalidStatusChange {
                from: self.status,
                to: TaskStatus::Assigned,
            });
        }
        self.status = TaskStatus::Assigned;
        self.assigned_agent_id = Some(agent_id);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TaskError> {
        if self.status != TaskStatus::Assigned {
            return Err(TaskError::InvalidStatusChange {
                from: self.status,
                to: TaskStatus::Running,
            });
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, result: Option<serde_json::Value>) -> Result<(), TaskError> {
        if !matches!(self.status, TaskStatus::Assigned | TaskStatus::Running) {
            return Err(TaskError::InvalidStatusChange {
                from: self.status,
                to: TaskStatus::Completed,
            });
        }
        self.status = TaskStatus::Completed;
        self.result = result;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        if !matches!(self.status, TaskStatus::Assigned | TaskStatus::Running) {
            return Err(TaskError::InvalidStatusChange {
                from: self.status,
                to: TaskStatus::Failed,
            });
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// A pending task whose dependency failed (or was itself blocked) can
    /// never become ready; it parks in `blocked` so the stall is queryable.
    pub fn block(&mut self) -> Result<(), TaskError> {
        if self.status != TaskStatus::Pending {
            return Err(TaskError::InvalidStatusChange {
                from: self.status,
                to: TaskStatus::Blocked,
            });
        }
        self.status = TaskStatus::Blocked;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering_follows_urgency() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
    }

    #[test]
    fn test_new_task_defaults_to_pending_medium() {
        let task = Task::new(NewTask::new(TicketId::new(), "build", "compile"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.dependencies.is_empty());
        assert!(task.assigned_agent_id.is_none());
    }

    #[test]
    fn test_assign_requires_pending() {
        let mut task = Task::new(NewTask::new(TicketId::new(), "build", "compile"));
        task.assign(AgentId::new()).unwrap();
        let err = task.assign(AgentId::new()).unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidStatusChange {
                from: TaskStatus::Assigned,
                to: TaskStatus::Assigned,
            }
        ));
    }

    #[test]
    fn test_complete_from_assigned_or_running() {
        let mut task = Task::new(NewTask::new(TicketId::new(), "build", "compile"));
        task.assign(AgentId::new()).unwrap();
        task.start().unwrap();
        task.complete(Some(serde_json::json!({"ok": true}))).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());

        let mut task = Task::new(NewTask::new(TicketId::new(), "build", "compile"));
        task.assign(AgentId::new()).unwrap();
        // Completion straight from assigned is allowed: short tasks may
        // report before the dispatcher marks them running.
        task.complete(None).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_terminal_states_reject_further_changes() {
        let mut task = Task::new(NewTask::new(TicketId::new(), "build", "compile"));
        task.assign(AgentId::new()).unwrap();
        task.fail("boom").unwrap();
        assert!(task.status.is_terminal());
        assert!(task.complete(None).is_err());
        assert!(task.start().is_err());
    }

    #[test]
    fn test_block_only_from_pending() {
        let mut task = Task::new(NewTask::new(TicketId::new(), "build", "compile"));
        task.block().unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(task.status.is_settled());
        assert!(!task.status.is_terminal());

        let mut task = Task::new(NewTask::new(TicketId::new(), "build", "compile"));
        task.assign(AgentId::new()).unwrap();
        assert!(task.block().is_err());
    }

    #[test]
    fn test_capability_matching_is_subset() {
        let spec = NewTask::new(TicketId::new(), "review", "code-review")
            .with_capabilities(vec!["rust".into(), "security".into()]);
        let task = Task::new(spec);
        assert!(task.matches_capabilities(&[
            "rust".to_string(),
            "security".to_string(),
            "python".to_string()
        ]));
        assert!(!task.matches_capabilities(&["rust".to_string()]));
        let unrestricted = Task::new(NewTask::new(TicketId::new(), "review", "lint"));
        assert!(unrestricted.matches_capabilities(&[]));
    }
}
