// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root, following the DDD Repository
//! pattern: one repository per aggregate, interface defined in the domain layer,
//! implemented in `crate::infrastructure::memory`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `TaskRepository` | `Task` | `InMemoryTaskRepository` |
//! | `LockRepository` | `ResourceLock` | `InMemoryLockRepository` |
//! | `AgentRepository` | `Agent` + transition log | `InMemoryAgentRepository` |
//! | `SyncPointRepository` | `SyncPoint` | `InMemorySyncPointRepository` |
//! | `JoinRepository` | `JoinContinuation` | `InMemoryJoinRepository` |
//! | `MergeRepository` | `MergeRecord` | `InMemoryMergeRepository` |
//!
//! ## Atomicity
//!
//! Every compare-and-set contract below (`try_*`, `mark_*`, `append_transition`)
//! is atomic inside the store. The application services stay stateless and
//! lock-free; races between concurrent callers are decided here, and the loser
//! observes `None` (or a typed outcome) rather than corrupt state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::agent::{Agent, AgentId, AgentStatus, StatusTransition, TransitionOutcome, TransitionRequest};
use crate::domain::coordination::{JoinContinuation, JoinId, MergeId, MergeRecord, SyncPoint, SyncPointId};
use crate::domain::lock::{AcquireOutcome, LockId, LockRequest, ReleaseOutcome, ResourceLock, ResourceRef};
use crate::domain::task::{Task, TaskId, TaskStatus, TicketId};

/// Repository interface for Task aggregates (Task Scheduling Context)
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a new task, stamping its arrival `sequence`
    async fn insert(&self, task: Task) -> Result<Task, RepositoryError>;

    /// Find task by ID
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Snapshot several tasks at once; unknown IDs are skipped
    async fn find_by_ids(&self, ids: &[TaskId]) -> Result<Vec<Task>, RepositoryError>;

    /// List every task under a ticket
    async fn list_by_ticket(&self, ticket_id: TicketId) -> Result<Vec<Task>, RepositoryError>;

    /// List tasks under a ticket narrowed to one phase
    async fn list_by_phase(&self, ticket_id: TicketId, phase: &str) -> Result<Vec<Task>, RepositoryError>;

    /// List tasks in a given status across all tickets
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, RepositoryError>;

    /// Tasks that name `id` in their dependency list
    async fn dependents_of(&self, id: TaskId) -> Result<Vec<Task>, RepositoryError>;

    /// CAS pending -> assigned. `None` means a concurrent caller won
    /// (the task was no longer pending).
    async fn try_assign(&self, id: TaskId, agent_id: AgentId) -> Result<Option<Task>, RepositoryError>;

    /// CAS assigned -> running, only for the agent the task was assigned to
    async fn mark_running(&self, id: TaskId, agent_id: AgentId) -> Result<Option<Task>, RepositoryError>;

    /// CAS assigned|running -> completed, storing the result payload
    async fn complete(&self, id: TaskId, result: Option<serde_json::Value>) -> Result<Option<Task>, RepositoryError>;

    /// CAS assigned|running -> failed, storing the error
    async fn fail(&self, id: TaskId, error: &str) -> Result<Option<Task>, RepositoryError>;

    /// CAS pending -> blocked
    async fn block(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;
}

/// Repository interface for ResourceLock aggregates (Resource Lock Context)
#[async_trait]
pub trait LockRepository: Send + Sync {
    /// Atomic conflict check and grant against the active holds on the
    /// requested resource
    async fn try_acquire(&self, request: LockRequest) -> Result<AcquireOutcome, RepositoryError>;

    /// Release a hold by ID; releasing twice is reported, not an error
    async fn release(&self, id: LockId) -> Result<ReleaseOutcome, RepositoryError>;

    /// Find lock by ID
    async fn find_by_id(&self, id: LockId) -> Result<Option<ResourceLock>, RepositoryError>;

    /// Active holds on one resource
    async fn active_for_resource(&self, resource: &ResourceRef) -> Result<Vec<ResourceLock>, RepositoryError>;

    /// All active holds, optionally narrowed to one holding agent or task
    async fn active_locks(&self, agent_id: Option<AgentId>, task_id: Option<TaskId>) -> Result<Vec<ResourceLock>, RepositoryError>;

    /// Release every active hold tied to a task; returns what was released
    async fn release_for_task(&self, task_id: TaskId) -> Result<Vec<ResourceLock>, RepositoryError>;

    /// Release every active hold of an agent; returns what was released
    async fn release_for_agent(&self, agent_id: AgentId) -> Result<Vec<ResourceLock>, RepositoryError>;

    /// Mark holds past their TTL as released; returns them for event emission
    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<ResourceLock>, RepositoryError>;
}

/// Repository interface for Agent aggregates and their transition log
/// (Agent Lifecycle Context). The log is append-only; the `Agent.status`
/// projection is updated in the same critical section as the append.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Store a new agent and append its registration record
    /// (`from_status: None`, `to_status: SPAWNING`) to the log
    async fn insert(&self, agent: Agent, registered_by: &str) -> Result<StatusTransition, RepositoryError>;

    /// Find agent by ID
    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;

    /// List all agents
    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError>;

    /// List agents currently in a given status
    async fn list_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>, RepositoryError>;

    /// Validate the request against the current projection and append
    /// atomically. Forced requests bypass the legality table but still
    /// produce a log record.
    async fn append_transition(&self, request: TransitionRequest) -> Result<TransitionOutcome, RepositoryError>;

    /// Transition log for one agent, most recent first
    async fn history(&self, agent_id: AgentId, limit: Option<usize>) -> Result<Vec<StatusTransition>, RepositoryError>;
}

/// Repository interface for SyncPoint aggregates (Coordination Context)
#[async_trait]
pub trait SyncPointRepository: Send + Sync {
    /// Store a new sync point
    async fn insert(&self, sync_point: SyncPoint) -> Result<(), RepositoryError>;

    /// Find sync point by ID
    async fn find_by_id(&self, id: SyncPointId) -> Result<Option<SyncPoint>, RepositoryError>;

    /// Pending sync points watching `task_id`
    async fn watching(&self, task_id: TaskId) -> Result<Vec<SyncPoint>, RepositoryError>;

    /// All pending sync points
    async fn list_pending(&self) -> Result<Vec<SyncPoint>, RepositoryError>;

    /// CAS pending -> satisfied; `None` when already settled
    async fn try_satisfy(&self, id: SyncPointId) -> Result<Option<SyncPoint>, RepositoryError>;

    /// CAS pending -> failed with `reason`; `None` when already settled
    async fn try_fail(&self, id: SyncPointId, reason: &str) -> Result<Option<SyncPoint>, RepositoryError>;

    /// CAS pending -> failed with the `timed_out` marker set; `None` when
    /// already settled
    async fn try_time_out(&self, id: SyncPointId, reason: &str) -> Result<Option<SyncPoint>, RepositoryError>;
}

/// Repository interface for JoinContinuation aggregates (Coordination Context)
#[async_trait]
pub trait JoinRepository: Send + Sync {
    /// Store a new join
    async fn insert(&self, join: JoinContinuation) -> Result<(), RepositoryError>;

    /// Find join by ID
    async fn find_by_id(&self, id: JoinId) -> Result<Option<JoinContinuation>, RepositoryError>;

    /// Pending joins with `task_id` among their sources
    async fn watching(&self, task_id: TaskId) -> Result<Vec<JoinContinuation>, RepositoryError>;

    /// All pending joins
    async fn list_pending(&self) -> Result<Vec<JoinContinuation>, RepositoryError>;

    /// CAS pending -> satisfied. Exactly one caller wins and goes on to
    /// create the continuation task.
    async fn try_mark_satisfied(&self, id: JoinId) -> Result<Option<JoinContinuation>, RepositoryError>;

    /// Record the continuation task spawned by the winning caller
    async fn set_continuation_task(&self, id: JoinId, task_id: TaskId) -> Result<(), RepositoryError>;

    /// CAS pending -> failed with `reason`; `None` when already settled
    async fn try_fail(&self, id: JoinId, reason: &str) -> Result<Option<JoinContinuation>, RepositoryError>;
}

/// Repository interface for MergeRecord aggregates (Coordination Context)
#[async_trait]
pub trait MergeRepository: Send + Sync {
    /// Store a new merge registration
    async fn insert(&self, merge: MergeRecord) -> Result<(), RepositoryError>;

    /// Find merge by ID
    async fn find_by_id(&self, id: MergeId) -> Result<Option<MergeRecord>, RepositoryError>;

    /// Pending merges with `task_id` among their sources
    async fn watching(&self, task_id: TaskId) -> Result<Vec<MergeRecord>, RepositoryError>;

    /// All pending merges
    async fn list_pending(&self) -> Result<Vec<MergeRecord>, RepositoryError>;

    /// CAS pending -> completed with the merged output
    async fn try_complete(&self, id: MergeId, output: serde_json::Value) -> Result<Option<MergeRecord>, RepositoryError>;

    /// CAS pending -> failed with `reason`; `None` when already settled
    async fn try_fail(&self, id: MergeId, reason: &str) -> Result<Option<MergeRecord>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
