// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task DAG Scheduler
//!
//! Application service deriving the ready set from the task store and
//! moving tasks through their status lifecycle.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Task readiness, assignment, and settlement
//! - **Collaborators:**
//!   - Domain: Task aggregate, TaskRepository
//!   - Infrastructure: EventBus
//!
//! Readiness is never cached: every query re-derives it from current task
//! statuses, so the scheduler itself holds no state worth recovering.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::error::{CoordinationError, EntityKind};
use crate::domain::events::TaskEvent;
use crate::domain::repository::TaskRepository;
use crate::domain::task::{NewTask, Task, TaskId, TaskStatus, TicketId};
use crate::infrastructure::event_bus::EventBus;

/// Callback invoked after a task settles (completed, failed, or blocked).
/// Hooks run inline on the reporting call, in registration order; the
/// coordination engine and the lock manager register themselves here.
pub type TaskSettlementHook = Arc<dyn Fn(Task) -> BoxFuture<'static, ()> + Send + Sync>;

/// Scheduling operations over the task DAG.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Create a task. Dependencies must name existing tasks; the edge set
    /// is immutable afterwards, which is what keeps the graph acyclic.
    async fn enqueue_task(&self, spec: NewTask) -> Result<Task, CoordinationError>;

    /// Fan-out helper: create one subtask per shape, each depending on the
    /// source task and inheriting its ticket.
    async fn split_task(
        &self,
        source_task_id: TaskId,
        shapes: Vec<NewTask>,
    ) -> Result<Vec<Task>, CoordinationError>;

    /// Derive the current ready set: pending tasks whose dependencies have
    /// all completed, ordered priority-descending then FIFO by arrival.
    ///
    /// `phase` restricts to one phase label, `limit` bounds the batch, and
    /// `capabilities` skips tasks the querying agent is not equipped for
    /// (those stay ready for better-suited agents).
    async fn ready_tasks(
        &self,
        phase: Option<&str>,
        limit: Option<usize>,
        capabilities: Option<&[String]>,
    ) -> Result<Vec<Task>, CoordinationError>;

    /// Claim a ready task for an agent. The pending -> assigned flip is a
    /// compare-and-swap in the store; exactly one concurrent caller wins,
    /// the rest get `AlreadyAssigned`.
    async fn assign_task(&self, task_id: TaskId, agent_id: AgentId)
        -> Result<Task, CoordinationError>;

    /// Mark an assigned task running. Only the assignee may start it.
    async fn start_task(&self, task_id: TaskId, agent_id: AgentId)
        -> Result<Task, CoordinationError>;

    /// Record a successful result and settle the task.
    async fn report_completion(
        &self,
        task_id: TaskId,
        result: Option<serde_json::Value>,
    ) -> Result<Task, CoordinationError>;

    /// Record a failure and settle the task. Pending dependents that can
    /// no longer run are parked as blocked, transitively.
    async fn report_failure(&self, task_id: TaskId, error: &str)
        -> Result<Task, CoordinationError>;

    async fn get_task(&self, task_id: TaskId) -> Result<Task, CoordinationError>;

    async fn ticket_tasks(&self, ticket_id: TicketId) -> Result<Vec<Task>, CoordinationError>;

    async fn phase_tasks(
        &self,
        ticket_id: TicketId,
        phase: &str,
    ) -> Result<Vec<Task>, CoordinationError>;
}

/// Standard implementation of TaskScheduler.
pub struct StandardTaskScheduler {
    tasks: Arc<dyn TaskRepository>,
    event_bus: Arc<EventBus>,
    settlement_hooks: RwLock<Vec<TaskSettlementHook>>,
    default_ready_limit: Option<usize>,
}

impl StandardTaskScheduler {
    pub fn new(tasks: Arc<dyn TaskRepository>, event_bus: Arc<EventBus>) -> Self {
        Self {
            tasks,
            event_bus,
            settlement_hooks: RwLock::new(Vec::new()),
            default_ready_limit: None,
        }
    }

    /// Batch bound applied when a ready query does not pass its own limit.
    pub fn with_default_ready_limit(mut self, limit: usize) -> Self {
        self.default_ready_limit = Some(limit);
        self
    }

    /// Register a settlement hook. Wiring happens once at startup; hooks
    /// registered later only see settlements from that point on.
    pub fn register_settlement_hook(&self, hook: TaskSettlementHook) {
        self.settlement_hooks.write().push(hook);
    }

    async fn fire_settlement_hooks(&self, task: &Task) {
        let hooks: Vec<TaskSettlementHook> = self.settlement_hooks.read().clone();
        for hook in hooks {
            hook(task.clone()).await;
        }
    }

    /// Dependency ids of `task` that have not completed.
    async fn unmet_dependencies(&self, task: &Task) -> Result<Vec<TaskId>, CoordinationError> {
        if task.dependencies.is_empty() {
            return Ok(Vec::new());
        }
        let deps = self.tasks.find_by_ids(&task.dependencies).await?;
        let completed: HashSet<TaskId> = deps
            .into_iter()
            .filter(|dep| dep.status == TaskStatus::Completed)
            .map(|dep| dep.id)
            .collect();
        Ok(task
            .dependencies
            .iter()
            .copied()
            .filter(|id| !completed.contains(id))
            .collect())
    }

    /// Walk the dependent edges out from a settled task, parking every
    /// still-pending dependent as blocked. Blocked tasks are dead for
    /// their own dependents too, so the walk is transitive.
    async fn block_dependents(&self, failed_id: TaskId) -> Result<Vec<Task>, CoordinationError> {
        let mut blocked = Vec::new();
        let mut frontier = vec![failed_id];
        while let Some(dead_id) = frontier.pop() {
            for dependent in self.tasks.dependents_of(dead_id).await? {
                if dependent.status != TaskStatus::Pending {
                    continue;
                }
                // CAS: a dependent that settled concurrently is skipped.
                if let Some(task) = self.tasks.block(dependent.id).await? {
                    warn!(
                        "Task {} blocked: dependency {} can no longer complete",
                        task.id, dead_id
                    );
                    self.event_bus.publish_task_event(TaskEvent::TaskBlocked {
                        task_id: task.id,
                        failed_dependency: dead_id,
                        blocked_at: Utc::now(),
                    });
                    frontier.push(task.id);
                    blocked.push(task);
                }
            }
        }
        Ok(blocked)
    }
}

#[async_trait]
impl TaskScheduler for StandardTaskScheduler {
    async fn enqueue_task(&self, spec: NewTask) -> Result<Task, CoordinationError> {
        // Step 1: Validate dependency edges against existing tasks
        let dependencies = if spec.dependencies.is_empty() {
            Vec::new()
        } else {
            let found = self.tasks.find_by_ids(&spec.dependencies).await?;
            if found.len() != spec.dependencies.len() {
                let known: HashSet<TaskId> = found.iter().map(|task| task.id).collect();
                let missing = spec
                    .dependencies
                    .iter()
                    .find(|id| !known.contains(id))
                    .copied()
                    .unwrap_or_else(TaskId::new);
                return Err(CoordinationError::UnknownEntity {
                    kind: EntityKind::Task,
                    id: missing.to_string(),
                });
            }
            found
        };

        // Step 2: Persist and announce
        let task = self.tasks.insert(Task::new(spec)).await?;
        info!(
            "Enqueued task {} ({}) for ticket {}",
            task.id, task.task_type, task.ticket_id
        );
        self.event_bus.publish_task_event(TaskEvent::TaskCreated {
            task_id: task.id,
            ticket_id: task.ticket_id,
            task_type: task.task_type.clone(),
            priority: task.priority,
            created_at: task.created_at,
        });

        // Step 3: A dependency that already settled without completing can
        // never unblock this task; park it straight away.
        let dead_dependency = dependencies
            .iter()
            .find(|dep| matches!(dep.status, TaskStatus::Failed | TaskStatus::Blocked));
        if let Some(dead) = dead_dependency {
            if let Some(blocked) = self.tasks.block(task.id).await? {
                warn!(
                    "Task {} blocked at enqueue: dependency {} is {}",
                    blocked.id, dead.id, dead.status
                );
                self.event_bus.publish_task_event(TaskEvent::TaskBlocked {
                    task_id: blocked.id,
                    failed_dependency: dead.id,
                    blocked_at: Utc::now(),
                });
                self.fire_settlement_hooks(&blocked).await;
                return Ok(blocked);
            }
        }

        Ok(task)
    }

    async fn split_task(
        &self,
        source_task_id: TaskId,
        shapes: Vec<NewTask>,
    ) -> Result<Vec<Task>, CoordinationError> {
        let source = self.get_task(source_task_id).await?;
        let mut subtasks = Vec::with_capacity(shapes.len());
        for mut shape in shapes {
            shape.ticket_id = source.ticket_id;
            if !shape.dependencies.contains(&source_task_id) {
                shape.dependencies.push(source_task_id);
            }
            subtasks.push(self.enqueue_task(shape).await?);
        }
        info!(
            "Split task {} into {} subtasks",
            source_task_id,
            subtasks.len()
        );
        Ok(subtasks)
    }

    async fn ready_tasks(
        &self,
        phase: Option<&str>,
        limit: Option<usize>,
        capabilities: Option<&[String]>,
    ) -> Result<Vec<Task>, CoordinationError> {
        // Step 1: Pull the pending set and resolve every dependency edge
        // in one bulk read
        let pending = self.tasks.list_by_status(TaskStatus::Pending).await?;
        let dep_ids: Vec<TaskId> = pending
            .iter()
            .flat_map(|task| task.dependencies.iter().copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let completed: HashSet<TaskId> = self
            .tasks
            .find_by_ids(&dep_ids)
            .await?
            .into_iter()
            .filter(|dep| dep.status == TaskStatus::Completed)
            .map(|dep| dep.id)
            .collect();

        // Step 2: Filter to the ready set
        let mut ready: Vec<Task> = pending
            .into_iter()
            .filter(|task| phase.is_none_or(|phase| task.phase == phase))
            .filter(|task| task.dependencies.iter().all(|dep| completed.contains(dep)))
            .filter(|task| capabilities.is_none_or(|caps| task.matches_capabilities(caps)))
            .collect();

        // Step 3: Priority bands first, FIFO inside a band
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        if let Some(limit) = limit.or(self.default_ready_limit) {
            ready.truncate(limit);
        }
        debug!("Derived {} ready tasks", ready.len());
        Ok(ready)
    }

    async fn assign_task(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
    ) -> Result<Task, CoordinationError> {
        // Step 1: Readiness check against a snapshot, for a precise error
        let task = self.get_task(task_id).await?;
        match task.status {
            TaskStatus::Pending => {
                let unmet = self.unmet_dependencies(&task).await?;
                if let Some(dep) = unmet.first() {
                    return Err(CoordinationError::NotReady {
                        task_id,
                        reason: format!("dependency {dep} has not completed"),
                    });
                }
            }
            TaskStatus::Assigned | TaskStatus::Running => {
                return Err(CoordinationError::AlreadyAssigned { task_id });
            }
            TaskStatus::Blocked => {
                return Err(CoordinationError::NotReady {
                    task_id,
                    reason: "task is blocked by a failed dependency".to_string(),
                });
            }
            status @ (TaskStatus::Completed | TaskStatus::Failed) => {
                return Err(CoordinationError::InvalidTaskState {
                    task_id,
                    status,
                    expected: "pending",
                });
            }
        }

        // Step 2: The store CAS decides the race
        match self.tasks.try_assign(task_id, agent_id).await? {
            Some(task) => {
                info!("Assigned task {} to agent {}", task_id, agent_id);
                self.event_bus.publish_task_event(TaskEvent::TaskAssigned {
                    task_id,
                    agent_id,
                    assigned_at: Utc::now(),
                });
                Ok(task)
            }
            None => {
                warn!("Lost assignment race for task {}", task_id);
                Err(CoordinationError::AlreadyAssigned { task_id })
            }
        }
    }

    async fn start_task(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
    ) -> Result<Task, CoordinationError> {
        match self
            .tasks
            .mark_running(task_id, agent_id)
            .await
            .map_err(CoordinationError::map_not_found(EntityKind::Task, task_id))?
        {
            Some(task) => {
                debug!("Task {} started by agent {}", task_id, agent_id);
                self.event_bus.publish_task_event(TaskEvent::TaskStarted {
                    task_id,
                    agent_id,
                    started_at: task.started_at.unwrap_or_else(Utc::now),
                });
                Ok(task)
            }
            None => {
                let current = self.get_task(task_id).await?;
                Err(CoordinationError::InvalidTaskState {
                    task_id,
                    status: current.status,
                    expected: "assigned to the starting agent",
                })
            }
        }
    }

    async fn report_completion(
        &self,
        task_id: TaskId,
        result: Option<serde_json::Value>,
    ) -> Result<Task, CoordinationError> {
        // Step 1: Settle via store CAS
        let task = match self
            .tasks
            .complete(task_id, result)
            .await
            .map_err(CoordinationError::map_not_found(EntityKind::Task, task_id))?
        {
            Some(task) => task,
            None => {
                let current = self.get_task(task_id).await?;
                return Err(CoordinationError::InvalidTaskState {
                    task_id,
                    status: current.status,
                    expected: "assigned or running",
                });
            }
        };

        // Step 2: Announce and notify settlement observers
        info!("Task {} completed", task_id);
        self.event_bus.publish_task_event(TaskEvent::TaskCompleted {
            task_id,
            agent_id: task.assigned_agent_id,
            completed_at: task.completed_at.unwrap_or_else(Utc::now),
        });
        self.fire_settlement_hooks(&task).await;
        Ok(task)
    }

    async fn report_failure(
        &self,
        task_id: TaskId,
        error: &str,
    ) -> Result<Task, CoordinationError> {
        // Step 1: Settle via store CAS
        let task = match self
            .tasks
            .fail(task_id, error)
            .await
            .map_err(CoordinationError::map_not_found(EntityKind::Task, task_id))?
        {
            Some(task) => task,
            None => {
                let current = self.get_task(task_id).await?;
                return Err(CoordinationError::InvalidTaskState {
                    task_id,
                    status: current.status,
                    expected: "assigned or running",
                });
            }
        };

        // Step 2: Announce the failure
        warn!("Task {} failed: {}", task_id, error);
        self.event_bus.publish_task_event(TaskEvent::TaskFailed {
            task_id,
            agent_id: task.assigned_agent_id,
            error: error.to_string(),
            failed_at: task.completed_at.unwrap_or_else(Utc::now),
        });

        // Step 3: Park dependents that can no longer run, then let the
        // observers see the whole settled picture at once
        let blocked = self.block_dependents(task_id).await?;
        self.fire_settlement_hooks(&task).await;
        for blocked_task in &blocked {
            self.fire_settlement_hooks(blocked_task).await;
        }
        Ok(task)
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Task, CoordinationError> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| CoordinationError::UnknownEntity {
                kind: EntityKind::Task,
                id: task_id.to_string(),
            })
    }

    async fn ticket_tasks(&self, ticket_id: TicketId) -> Result<Vec<Task>, CoordinationError> {
        Ok(self.tasks.list_by_ticket(ticket_id).await?)
    }

    async fn phase_tasks(
        &self,
        ticket_id: TicketId,
        phase: &str,
    ) -> Result<Vec<Task>, CoordinationError> {
        Ok(self.tasks.list_by_phase(ticket_id, phase).await?)
    }
}
