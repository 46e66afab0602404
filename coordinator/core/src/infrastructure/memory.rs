// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-Memory Repository Implementations
//!
//! Thread-safe HashMap-backed implementations of the repository contracts
//! in `crate::domain::repository`, used for development, testing, and
//! single-process deployments.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! Every compare-and-set contract runs under a single write guard, so two
//! callers racing for the same task, lock, or transition are serialized
//! here and exactly one observes success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::agent::{
    Agent, AgentId, AgentStatus, StatusTransition, TransitionOutcome, TransitionRequest,
};
use crate::domain::coordination::{
    JoinContinuation, JoinId, JoinStatus, MergeId, MergeRecord, MergeStatus, SyncPoint,
    SyncPointId, SyncPointStatus,
};
use crate::domain::lock::{
    AcquireOutcome, LockId, LockRequest, ReleaseOutcome, ResourceLock, ResourceRef,
};
use crate::domain::repository::{
    AgentRepository, JoinRepository, LockRepository, MergeRepository, RepositoryError,
    SyncPointRepository, TaskRepository,
};
use crate::domain::task::{Task, TaskId, TaskStatus, TicketId};

// ============================================================================
// Tasks
// ============================================================================

struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    next_sequence: u64,
}

#[derive(Clone)]
pub struct InMemoryTaskRepository {
    state: Arc<RwLock<TaskStore>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(TaskStore {
                tasks: HashMap::new(),
                next_sequence: 0,
            })),
        }
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, mut task: Task) -> Result<Task, RepositoryError> {
        let mut store = self.state.write().await;
        if store.tasks.contains_key(&task.id) {
            return Err(RepositoryError::Storage(format!(
                "task {} already exists",
                task.id
            )));
        }
        store.next_sequence += 1;
        task.sequence = store.next_sequence;
        store.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let store = self.state.read().await;
        Ok(store.tasks.get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: &[TaskId]) -> Result<Vec<Task>, RepositoryError> {
        let store = self.state.read().await;
        // Output follows input order so payload merges stay deterministic.
        Ok(ids
            .iter()
            .filter_map(|id| store.tasks.get(id).cloned())
            .collect())
    }

    async fn list_by_ticket(&self, ticket_id: TicketId) -> Result<Vec<Task>, RepositoryError> {
        let store = self.state.read().await;
        let mut tasks: Vec<Task> = store
            .tasks
            .values()
            .filter(|task| task.ticket_id == ticket_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.sequence);
        Ok(tasks)
    }

    async fn list_by_phase(
        &self,
        ticket_id: TicketId,
        phase: &str,
    ) -> Result<Vec<Task>, RepositoryError> {
        let store = self.state.read().await;
        let mut tasks: Vec<Task> = store
            .tasks
            .values()
            .filter(|task| task.ticket_id == ticket_id && task.phase == phase)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.sequence);
        Ok(tasks)
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, RepositoryError> {
        let store = self.state.read().await;
        let mut tasks: Vec<Task> = store
            .tasks
            .values()
            .filter(|task| task.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.sequence);
        Ok(tasks)
    }

    async fn dependents_of(&self, id: TaskId) -> Result<Vec<Task>, RepositoryError> {
        let store = self.state.read().await;
        let mut tasks: Vec<Task> = store
            .tasks
            .values()
            .filter(|task| task.dependencies.contains(&id))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.sequence);
        Ok(tasks)
    }

    async fn try_assign(
        &self,
        id: TaskId,
        agent_id: AgentId,
    ) -> Result<Option<Task>, RepositoryError> {
        let mut store = self.state.write().await;
        let task = store
            .tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {id}")))?;
        if task.assign(agent_id).is_err() {
            return Ok(None);
        }
        Ok(Some(task.clone()))
    }

    async fn mark_running(
        &self,
        id: TaskId,
        agent_id: AgentId,
    ) -> Result<Option<Task>, RepositoryError> {
        let mut store = self.state.write().await;
        let task = store
            .tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {id}")))?;
        if task.assigned_agent_id != Some(agent_id) {
            return Ok(None);
        }
        if task.start().is_err() {
            return Ok(None);
        }
        Ok(Some(task.clone()))
    }

    async fn complete(
        &self,
        id: TaskId,
        result: Option<serde_json::Value>,
    ) -> Result<Option<Task>, RepositoryError> {
        let mut store = self.state.write().await;
        let task = store
            .tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {id}")))?;
        if task.complete(result).is_err() {
            return Ok(None);
        }
        Ok(Some(task.clone()))
    }

    async fn fail(&self, id: TaskId, error: &str) -> Result<Option<Task>, RepositoryError> {
        let mut store = self.state.write().await;
        let task = store
            .tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {id}")))?;
        if task.fail(error).is_err() {
            return Ok(None);
        }
        Ok(Some(task.clone()))
    }

    async fn block(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let mut store = self.state.write().await;
        let task = store
            .tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {id}")))?;
        if task.block().is_err() {
            return Ok(None);
        }
        Ok(Some(task.clone()))
    }
}

// ============================================================================
// Locks
// ============================================================================

#[derive(Clone)]
pub struct InMemoryLockRepository {
    locks: Arc<RwLock<HashMap<LockId, ResourceLock>>>,
}

impl InMemoryLockRepository {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryLockRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockRepository for InMemoryLockRepository {
    async fn try_acquire(&self, request: LockRequest) -> Result<AcquireOutcome, RepositoryError> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();
        // Expired holds are inert: they no longer block anyone.
        let blocking = locks
            .values()
            .find(|lock| {
                lock.resource == request.resource
                    && lock.is_active(now)
                    && lock.mode.conflicts_with(request.mode)
            })
            .cloned();
        if let Some(blocking) = blocking {
            return Ok(AcquireOutcome::Conflict { blocking });
        }
        let lock = ResourceLock::new(request);
        locks.insert(lock.id, lock.clone());
        Ok(AcquireOutcome::Acquired(lock))
    }

    async fn release(&self, id: LockId) -> Result<ReleaseOutcome, RepositoryError> {
        let mut locks = self.locks.write().await;
        let lock = locks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("lock {id}")))?;
        if lock.released_at.is_some() {
            return Ok(ReleaseOutcome::AlreadyReleased(lock.clone()));
        }
        lock.released_at = Some(Utc::now());
        Ok(ReleaseOutcome::Released(lock.clone()))
    }

    async fn find_by_id(&self, id: LockId) -> Result<Option<ResourceLock>, RepositoryError> {
        let locks = self.locks.read().await;
        Ok(locks.get(&id).cloned())
    }

    async fn active_for_resource(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<ResourceLock>, RepositoryError> {
        let locks = self.locks.read().await;
        let now = Utc::now();
        Ok(locks
            .values()
            .filter(|lock| lock.resource == *resource && lock.is_active(now))
            .cloned()
            .collect())
    }

    async fn active_locks(
        &self,
        agent_id: Option<AgentId>,
        task_id: Option<TaskId>,
    ) -> Result<Vec<ResourceLock>, RepositoryError> {
        let locks = self.locks.read().await;
        let now = Utc::now();
        let mut active: Vec<ResourceLock> = locks
            .values()
            .filter(|lock| lock.is_active(now))
            .filter(|lock| agent_id.is_none_or(|agent| lock.holder.agent_id == agent))
            .filter(|lock| task_id.is_none_or(|task| lock.holder.task_id == Some(task)))
            .cloned()
            .collect();
        active.sort_by_key(|lock| lock.acquired_at);
        Ok(active)
    }

    async fn release_for_task(&self, task_id: TaskId) -> Result<Vec<ResourceLock>, RepositoryError> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();
        let mut released = Vec::new();
        for lock in locks.values_mut() {
            if lock.is_active(now) && lock.holder.task_id == Some(task_id) {
                lock.released_at = Some(now);
                released.push(lock.clone());
            }
        }
        Ok(released)
    }

    async fn release_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<ResourceLock>, RepositoryError> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();
        let mut released = Vec::new();
        for lock in locks.values_mut() {
            if lock.is_active(now) && lock.holder.agent_id == agent_id {
                lock.released_at = Some(now);
                released.push(lock.clone());
            }
        }
        Ok(released)
    }

    async fn release_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceLock>, RepositoryError> {
        let mut locks = self.locks.write().await;
        let mut expired = Vec::new();
        for lock in locks.values_mut() {
            if lock.released_at.is_none() && lock.is_expired(now) {
                lock.released_at = Some(now);
                expired.push(lock.clone());
            }
        }
        Ok(expired)
    }
}

// ============================================================================
// Agents and their transition log
// ============================================================================

struct AgentStore {
    agents: HashMap<AgentId, Agent>,
    /// Append-only; records are never mutated or removed.
    log: Vec<StatusTransition>,
    next_sequence: u64,
}

#[derive(Clone)]
pub struct InMemoryAgentRepository {
    state: Arc<RwLock<AgentStore>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(AgentStore {
                agents: HashMap::new(),
                log: Vec::new(),
                next_sequence: 0,
            })),
        }
    }
}

impl Default for InMemoryAgentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn insert(
        &self,
        agent: Agent,
        registered_by: &str,
    ) -> Result<StatusTransition, RepositoryError> {
        let mut store = self.state.write().await;
        if store.agents.contains_key(&agent.id) {
            return Err(RepositoryError::Storage(format!(
                "agent {} already registered",
                agent.id
            )));
        }
        store.next_sequence += 1;
        let seed = StatusTransition {
            sequence: store.next_sequence,
            agent_id: agent.id,
            from_status: None,
            to_status: agent.status,
            reason: "agent registered".to_string(),
            triggered_by: registered_by.to_string(),
            task_id: None,
            forced: false,
            transitioned_at: agent.registered_at,
            metadata: None,
        };
        store.log.push(seed.clone());
        store.agents.insert(agent.id, agent);
        Ok(seed)
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        let store = self.state.read().await;
        Ok(store.agents.get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let store = self.state.read().await;
        Ok(store.agents.values().cloned().collect())
    }

    async fn list_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>, RepositoryError> {
        let store = self.state.read().await;
        Ok(store
            .agents
            .values()
            .filter(|agent| agent.status == status)
            .cloned()
            .collect())
    }

    async fn append_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut store = self.state.write().await;
        let agent = store
            .agents
            .get(&request.agent_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", request.agent_id)))?;
        // Legality is judged against the projection inside this critical
        // section, so concurrent appends cannot interleave a stale from_status.
        let from = agent.status;
        if !request.forced && !from.can_transition_to(request.to_status) {
            return Ok(TransitionOutcome::Rejected {
                from,
                to: request.to_status,
            });
        }
        store.next_sequence += 1;
        let now = Utc::now();
        let transition = StatusTransition {
            sequence: store.next_sequence,
            agent_id: request.agent_id,
            from_status: Some(from),
            to_status: request.to_status,
            reason: request.reason,
            triggered_by: request.triggered_by,
            task_id: request.task_id,
            forced: request.forced,
            transitioned_at: now,
            metadata: request.metadata,
        };
        store.log.push(transition.clone());
        let agent = store
            .agents
            .get_mut(&request.agent_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", request.agent_id)))?;
        agent.status = request.to_status;
        agent.updated_at = now;
        Ok(TransitionOutcome::Applied(transition))
    }

    async fn history(
        &self,
        agent_id: AgentId,
        limit: Option<usize>,
    ) -> Result<Vec<StatusTransition>, RepositoryError> {
        let store = self.state.read().await;
        let records = store
            .log
            .iter()
            .rev()
            .filter(|record| record.agent_id == agent_id)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(records)
    }
}

// ============================================================================
// Sync points
// ============================================================================

#[derive(Clone)]
pub struct InMemorySyncPointRepository {
    sync_points: Arc<RwLock<HashMap<SyncPointId, SyncPoint>>>,
}

impl InMemorySyncPointRepository {
    pub fn new() -> Self {
        Self {
            sync_points: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySyncPointRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncPointRepository for InMemorySyncPointRepository {
    async fn insert(&self, sync_point: SyncPoint) -> Result<(), RepositoryError> {
        let mut sync_points = self.sync_points.write().await;
        sync_points.insert(sync_point.id, sync_point);
        Ok(())
    }

    async fn find_by_id(&self, id: SyncPointId) -> Result<Option<SyncPoint>, RepositoryError> {
        let sync_points = self.sync_points.read().await;
        Ok(sync_points.get(&id).cloned())
    }

    async fn watching(&self, task_id: TaskId) -> Result<Vec<SyncPoint>, RepositoryError> {
        let sync_points = self.sync_points.read().await;
        Ok(sync_points
            .values()
            .filter(|sync| sync.status == SyncPointStatus::Pending && sync.watches(task_id))
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<SyncPoint>, RepositoryError> {
        let sync_points = self.sync_points.read().await;
        Ok(sync_points
            .values()
            .filter(|sync| sync.status == SyncPointStatus::Pending)
            .cloned()
            .collect())
    }

    async fn try_satisfy(&self, id: SyncPointId) -> Result<Option<SyncPoint>, RepositoryError> {
        let mut sync_points = self.sync_points.write().await;
        let sync = sync_points
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("sync point {id}")))?;
        if sync.status != SyncPointStatus::Pending {
            return Ok(None);
        }
        sync.status = SyncPointStatus::Satisfied;
        sync.satisfied_at = Some(Utc::now());
        Ok(Some(sync.clone()))
    }

    async fn try_fail(
        &self,
        id: SyncPointId,
        reason: &str,
    ) -> Result<Option<SyncPoint>, RepositoryError> {
        let mut sync_points = self.sync_points.write().await;
        let sync = sync_points
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("sync point {id}")))?;
        if sync.status != SyncPointStatus::Pending {
            return Ok(None);
        }
        sync.status = SyncPointStatus::Failed;
        sync.failure_reason = Some(reason.to_string());
        Ok(Some(sync.clone()))
    }

    async fn try_time_out(
        &self,
        id: SyncPointId,
        reason: &str,
    ) -> Result<Option<SyncPoint>, RepositoryError> {
        let mut sync_points = self.sync_points.write().await;
        let sync = sync_points
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("sync point {id}")))?;
        if sync.status != SyncPointStatus::Pending {
            return Ok(None);
        }
        sync.status = SyncPointStatus::Failed;
        sync.failure_reason = Some(reason.to_string());
        sync.timed_out = true;
        Ok(Some(sync.clone()))
    }
}

// ============================================================================
// Joins
// ============================================================================

#[derive(Clone)]
pub struct InMemoryJoinRepository {
    joins: Arc<RwLock<HashMap<JoinId, JoinContinuation>>>,
}

impl InMemoryJoinRepository {
    pub fn new() -> Self {
        Self {
            joins: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryJoinRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JoinRepository for InMemoryJoinRepository {
    async fn insert(&self, join: JoinContinuation) -> Result<(), RepositoryError> {
        let mut joins = self.joins.write().await;
        joins.insert(join.id, join);
        Ok(())
    }

    async fn find_by_id(&self, id: JoinId) -> Result<Option<JoinContinuation>, RepositoryError> {
        let joins = self.joins.read().await;
        Ok(joins.get(&id).cloned())
    }

    async fn watching(&self, task_id: TaskId) -> Result<Vec<JoinContinuation>, RepositoryError> {
        let joins = self.joins.read().await;
        Ok(joins
            .values()
            .filter(|join| join.status == JoinStatus::Pending && join.watches(task_id))
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<JoinContinuation>, RepositoryError> {
        let joins = self.joins.read().await;
        Ok(joins
            .values()
            .filter(|join| join.status == JoinStatus::Pending)
            .cloned()
            .collect())
    }

    async fn try_mark_satisfied(
        &self,
        id: JoinId,
    ) -> Result<Option<JoinContinuation>, RepositoryError> {
        let mut joins = self.joins.write().await;
        let join = joins
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("join {id}")))?;
        if join.status != JoinStatus::Pending {
            return Ok(None);
        }
        join.status = JoinStatus::Satisfied;
        join.satisfied_at = Some(Utc::now());
        Ok(Some(join.clone()))
    }

    async fn set_continuation_task(&self, id: JoinId, task_id: TaskId) -> Result<(), RepositoryError> {
        let mut joins = self.joins.write().await;
        let join = joins
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("join {id}")))?;
        join.continuation_task_id = Some(task_id);
        Ok(())
    }

    async fn try_fail(
        &self,
        id: JoinId,
        reason: &str,
    ) -> Result<Option<JoinContinuation>, RepositoryError> {
        let mut joins = self.joins.write().await;
        let join = joins
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("join {id}")))?;
        if join.status != JoinStatus::Pending {
            return Ok(None);
        }
        join.status = JoinStatus::Failed;
        join.failure_reason = Some(reason.to_string());
        Ok(Some(join.clone()))
    }
}

// ============================================================================
// Merges
// ============================================================================

#[derive(Clone)]
pub struct InMemoryMergeRepository {
    merges: Arc<RwLock<HashMap<MergeId, MergeRecord>>>,
}

impl InMemoryMergeRepository {
    pub fn new() -> Self {
        Self {
            merges: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryMergeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MergeRepository for InMemoryMergeRepository {
    async fn insert(&self, merge: MergeRecord) -> Result<(), RepositoryError> {
        let mut merges = self.merges.write().await;
        merges.insert(merge.id, merge);
        Ok(())
    }

    async fn find_by_id(&self, id: MergeId) -> Result<Option<MergeRecord>, RepositoryError> {
        let merges = self.merges.read().await;
        Ok(merges.get(&id).cloned())
    }

    async fn watching(&self, task_id: TaskId) -> Result<Vec<MergeRecord>, RepositoryError> {
        let merges = self.merges.read().await;
        Ok(merges
            .values()
            .filter(|merge| merge.status == MergeStatus::Pending && merge.watches(task_id))
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<MergeRecord>, RepositoryError> {
        let merges = self.merges.read().await;
        Ok(merges
            .values()
            .filter(|merge| merge.status == MergeStatus::Pending)
            .cloned()
            .collect())
    }

    async fn try_complete(
        &self,
        id: MergeId,
        output: serde_json::Value,
    ) -> Result<Option<MergeRecord>, RepositoryError> {
        let mut merges = self.merges.write().await;
        let merge = merges
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("merge {id}")))?;
        if merge.status != MergeStatus::Pending {
            return Ok(None);
        }
        merge.status = MergeStatus::Completed;
        merge.output = Some(output);
        merge.merged_at = Some(Utc::now());
        Ok(Some(merge.clone()))
    }

    async fn try_fail(
        &self,
        id: MergeId,
        reason: &str,
    ) -> Result<Option<MergeRecord>, RepositoryError> {
        let mut merges = self.merges.write().await;
        let merge = merges
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("merge {id}")))?;
        if merge.status != MergeStatus::Pending {
            return Ok(None);
        }
        merge.status = MergeStatus::Failed;
        merge.failure_reason = Some(reason.to_string());
        Ok(Some(merge.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::coordination::{JoinGate, JoinSpec, MergeKind, SyncPointSpec};
    use crate::domain::coordination::ContinuationSpec;
    use crate::domain::lock::{LockHolder, LockMode};
    use crate::domain::task::NewTask;
    use std::time::Duration;

    fn task(repo_ticket: TicketId) -> Task {
        Task::new(NewTask::new(repo_ticket, "build", "compile"))
    }

    // ── Task store ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_insert_stamps_monotonic_sequence() {
        let repo = InMemoryTaskRepository::new();
        let ticket = TicketId::new();
        let first = repo.insert(task(ticket)).await.unwrap();
        let second = repo.insert(task(ticket)).await.unwrap();
        assert!(second.sequence > first.sequence);
    }

    #[tokio::test]
    async fn test_try_assign_is_exactly_once() {
        let repo = InMemoryTaskRepository::new();
        let stored = repo.insert(task(TicketId::new())).await.unwrap();
        let winner = repo.try_assign(stored.id, AgentId::new()).await.unwrap();
        assert!(winner.is_some());
        let loser = repo.try_assign(stored.id, AgentId::new()).await.unwrap();
        assert!(loser.is_none());
    }

    #[tokio::test]
    async fn test_mark_running_checks_assignee() {
        let repo = InMemoryTaskRepository::new();
        let stored = repo.insert(task(TicketId::new())).await.unwrap();
        let agent = AgentId::new();
        repo.try_assign(stored.id, agent).await.unwrap().unwrap();
        assert!(repo
            .mark_running(stored.id, AgentId::new())
            .await
            .unwrap()
            .is_none());
        assert!(repo.mark_running(stored.id, agent).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_by_ids_preserves_order() {
        let repo = InMemoryTaskRepository::new();
        let ticket = TicketId::new();
        let a = repo.insert(task(ticket)).await.unwrap();
        let b = repo.insert(task(ticket)).await.unwrap();
        let snapshot = repo.find_by_ids(&[b.id, TaskId::new(), a.id]).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, b.id);
        assert_eq!(snapshot[1].id, a.id);
    }

    // ── Lock store ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_exclusive_then_shared_conflicts() {
        let repo = InMemoryLockRepository::new();
        let resource = ResourceRef::new("file", "src/main.rs");
        let request =
            LockRequest::new(resource.clone(), LockMode::Exclusive, LockHolder::agent(AgentId::new()));
        assert!(matches!(
            repo.try_acquire(request).await.unwrap(),
            AcquireOutcome::Acquired(_)
        ));
        let request =
            LockRequest::new(resource, LockMode::Shared, LockHolder::agent(AgentId::new()));
        assert!(matches!(
            repo.try_acquire(request).await.unwrap(),
            AcquireOutcome::Conflict { .. }
        ));
    }

    #[tokio::test]
    async fn test_shared_holds_coexist() {
        let repo = InMemoryLockRepository::new();
        let resource = ResourceRef::new("doc", "design.md");
        for _ in 0..3 {
            let request =
                LockRequest::new(resource.clone(), LockMode::Shared, LockHolder::agent(AgentId::new()));
            assert!(matches!(
                repo.try_acquire(request).await.unwrap(),
                AcquireOutcome::Acquired(_)
            ));
        }
        assert_eq!(repo.active_for_resource(&resource).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_release_expired_reports_and_unblocks() {
        let repo = InMemoryLockRepository::new();
        let resource = ResourceRef::new("file", "Cargo.toml");
        let request = LockRequest::new(
            resource.clone(),
            LockMode::Exclusive,
            LockHolder::agent(AgentId::new()),
        )
        .with_ttl(Duration::from_millis(1));
        repo.try_acquire(request).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        let expired = repo.release_expired(later).await.unwrap();
        assert_eq!(expired.len(), 1);
        // Second sweep finds nothing left to report.
        assert!(repo.release_expired(later).await.unwrap().is_empty());

        let request =
            LockRequest::new(resource, LockMode::Exclusive, LockHolder::agent(AgentId::new()));
        assert!(matches!(
            repo.try_acquire(request).await.unwrap(),
            AcquireOutcome::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn test_release_for_agent_only_touches_that_agent() {
        let repo = InMemoryLockRepository::new();
        let ours = AgentId::new();
        let theirs = AgentId::new();
        for (agent, path) in [(ours, "a.rs"), (ours, "b.rs"), (theirs, "c.rs")] {
            let request = LockRequest::new(
                ResourceRef::new("file", path),
                LockMode::Exclusive,
                LockHolder::agent(agent),
            );
            repo.try_acquire(request).await.unwrap();
        }
        let released = repo.release_for_agent(ours).await.unwrap();
        assert_eq!(released.len(), 2);
        assert_eq!(repo.active_locks(Some(theirs), None).await.unwrap().len(), 1);
    }

    // ── Agent store ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_insert_seeds_registration_record() {
        let repo = InMemoryAgentRepository::new();
        let agent = Agent::new("builder-1", vec!["rust".into()]);
        let agent_id = agent.id;
        let seed = repo.insert(agent, "coordinator").await.unwrap();
        assert_eq!(seed.from_status, None);
        assert_eq!(seed.to_status, AgentStatus::Spawning);

        let history = repo.history(agent_id, None).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_append_validates_against_projection() {
        let repo = InMemoryAgentRepository::new();
        let agent = Agent::new("builder-1", vec![]);
        let agent_id = agent.id;
        repo.insert(agent, "coordinator").await.unwrap();

        // SPAWNING -> RUNNING skips IDLE and must be rejected.
        let outcome = repo
            .append_transition(TransitionRequest::new(
                agent_id,
                AgentStatus::Running,
                "skip ahead",
                "test",
            ))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Rejected {
                from: AgentStatus::Spawning,
                to: AgentStatus::Running,
            }
        ));

        let outcome = repo
            .append_transition(TransitionRequest::new(
                agent_id,
                AgentStatus::Idle,
                "boot complete",
                "test",
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));
        let stored = repo.find_by_id(agent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_forced_append_bypasses_legality_but_logs() {
        let repo = InMemoryAgentRepository::new();
        let agent = Agent::new("builder-1", vec![]);
        let agent_id = agent.id;
        repo.insert(agent, "coordinator").await.unwrap();

        let outcome = repo
            .append_transition(
                TransitionRequest::new(agent_id, AgentStatus::Quarantined, "guardian override", "guardian")
                    .forced(),
            )
            .await
            .unwrap();
        let TransitionOutcome::Applied(record) = outcome else {
            panic!("forced transition must apply");
        };
        assert!(record.forced);
        assert_eq!(record.from_status, Some(AgentStatus::Spawning));

        let history = repo.history(agent_id, None).await.unwrap();
        assert_eq!(history.len(), 2);
        // Most recent first.
        assert_eq!(history[0].to_status, AgentStatus::Quarantined);
        assert_eq!(history[1].from_status, None);
    }

    #[tokio::test]
    async fn test_history_limit() {
        let repo = InMemoryAgentRepository::new();
        let agent = Agent::new("builder-1", vec![]);
        let agent_id = agent.id;
        repo.insert(agent, "coordinator").await.unwrap();
        repo.append_transition(TransitionRequest::new(agent_id, AgentStatus::Idle, "boot", "test"))
            .await
            .unwrap();
        repo.append_transition(TransitionRequest::new(agent_id, AgentStatus::Running, "work", "test"))
            .await
            .unwrap();

        let history = repo.history(agent_id, Some(2)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_status, AgentStatus::Running);
        assert_eq!(history[1].to_status, AgentStatus::Idle);
    }

    // ── Coordination stores ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_sync_point_settles_once() {
        let repo = InMemorySyncPointRepository::new();
        let sync = SyncPoint::new(SyncPointSpec::all_of(vec![TaskId::new()])).unwrap();
        let id = sync.id;
        repo.insert(sync).await.unwrap();

        assert!(repo.try_satisfy(id).await.unwrap().is_some());
        assert!(repo.try_satisfy(id).await.unwrap().is_none());
        assert!(repo.try_fail(id, "late").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_point_time_out_sets_marker_and_settles_once() {
        let repo = InMemorySyncPointRepository::new();
        let sync = SyncPoint::new(SyncPointSpec::all_of(vec![TaskId::new()])).unwrap();
        let id = sync.id;
        repo.insert(sync).await.unwrap();

        let timed_out = repo
            .try_time_out(id, "timed out after 5s")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timed_out.status, SyncPointStatus::Failed);
        assert!(timed_out.timed_out);
        assert!(repo.try_fail(id, "late").await.unwrap().is_none());

        // Plain failure never carries the marker.
        let other = SyncPoint::new(SyncPointSpec::all_of(vec![TaskId::new()])).unwrap();
        let other_id = other.id;
        repo.insert(other).await.unwrap();
        let failed = repo.try_fail(other_id, "boom").await.unwrap().unwrap();
        assert!(!failed.timed_out);
    }

    #[tokio::test]
    async fn test_join_satisfaction_has_single_winner() {
        let repo = InMemoryJoinRepository::new();
        let join = JoinContinuation::new(
            TicketId::new(),
            JoinSpec {
                source_task_ids: vec![TaskId::new()],
                gate: JoinGate::All,
                continuation: ContinuationSpec::new("summarize"),
            },
        )
        .unwrap();
        let id = join.id;
        repo.insert(join).await.unwrap();

        assert!(repo.try_mark_satisfied(id).await.unwrap().is_some());
        assert!(repo.try_mark_satisfied(id).await.unwrap().is_none());

        let continuation = TaskId::new();
        repo.set_continuation_task(id, continuation).await.unwrap();
        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.continuation_task_id, Some(continuation));
    }

    #[tokio::test]
    async fn test_merge_completes_once() {
        let repo = InMemoryMergeRepository::new();
        let merge =
            MergeRecord::new(None, vec![TaskId::new()], MergeKind::Combine).unwrap();
        let id = merge.id;
        repo.insert(merge).await.unwrap();

        let output = serde_json::json!({"merged": true});
        assert!(repo.try_complete(id, output).await.unwrap().is_some());
        assert!(repo
            .try_complete(id, serde_json::json!({}))
            .await
            .unwrap()
            .is_none());
    }
}
