// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination Engine
//!
//! Application service running sync points, fan-in joins, result merges,
//! and declarative pattern application on top of the task store.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Cross-task synchronization and continuation
//! - **Collaborators:**
//!   - Domain: SyncPoint, JoinContinuation, MergeRecord, PatternTemplate
//!   - Infrastructure: SyncPoint/Join/Merge/Task repositories, EventBus,
//!     PatternRegistry
//!
//! Evaluation is driven by task settlement: the scheduler's settlement
//! hook calls [`CoordinationEngine::on_task_settled`], which re-checks
//! every pending entity watching that task. All settle-once decisions go
//! through the store's compare-and-swap methods, so concurrent
//! evaluations of the same entity produce exactly one satisfaction,
//! failure, or merge.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::coordination::{
    GateDecision, JoinContinuation, JoinId, JoinSpec, JoinStatus, MergeId, MergeKind, MergeRecord,
    MergeStatus, MergeStrategy, MergedResult, SyncPoint, SyncPointId, SyncPointSpec,
    SyncPointStatus,
};
use crate::domain::error::{CoordinationError, EntityKind};
use crate::domain::events::{CoordinationEvent, TaskEvent};
use crate::domain::pattern::TaskShape;
use crate::domain::repository::{
    JoinRepository, MergeRepository, SyncPointRepository, TaskRepository,
};
use crate::domain::task::{NewTask, Task, TaskId, TaskStatus, TicketId};
use crate::infrastructure::event_bus::{EventBus, EventBusError};
use crate::infrastructure::pattern_registry::PatternRegistry;

/// What a pattern application created, keyed by template-local names.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppliedPattern {
    pub pattern_name: String,
    pub ticket_id: TicketId,
    pub initial_task_id: TaskId,
    pub task_ids: HashMap<String, TaskId>,
    pub sync_point_ids: Vec<SyncPointId>,
    pub join_id: Option<JoinId>,
    pub merge_id: Option<MergeId>,
}

#[async_trait]
pub trait CoordinationEngine: Send + Sync {
    /// Create a barrier over existing tasks. Already-completed watched
    /// tasks count immediately, so a sync point whose threshold is met at
    /// creation comes back satisfied.
    async fn create_sync_point(&self, spec: SyncPointSpec)
        -> Result<SyncPoint, CoordinationError>;

    async fn get_sync_point(&self, id: SyncPointId) -> Result<SyncPoint, CoordinationError>;

    /// Block until the sync point settles, bounded by its deadline. Waits
    /// are event-driven; there is no polling loop.
    ///
    /// Returns the satisfied record, `SyncPointTimeout` if the deadline
    /// passes first, or `SyncPointFailed` if the threshold became
    /// unreachable.
    async fn await_sync_point(&self, id: SyncPointId) -> Result<SyncPoint, CoordinationError>;

    /// Sweep pending sync points past their deadline into the failed
    /// state. Returns the records timed out by this call.
    async fn check_overdue_sync_points(&self) -> Result<Vec<SyncPoint>, CoordinationError>;

    /// Register a fan-in join. When the gate fires, the continuation task
    /// is created depending on the satisfied sources.
    async fn register_join(
        &self,
        ticket_id: TicketId,
        spec: JoinSpec,
    ) -> Result<JoinContinuation, CoordinationError>;

    async fn get_join(&self, id: JoinId) -> Result<JoinContinuation, CoordinationError>;

    /// Register a merge executed once every source completes. Any source
    /// settling without completing fails the merge terminally.
    async fn register_merge(
        &self,
        ticket_id: Option<TicketId>,
        source_task_ids: Vec<TaskId>,
        kind: MergeKind,
    ) -> Result<MergeRecord, CoordinationError>;

    async fn get_merge(&self, id: MergeId) -> Result<MergeRecord, CoordinationError>;

    /// Merge the results of already-completed tasks, in the given order.
    /// Unlike [`register_merge`](CoordinationEngine::register_merge) this
    /// supports caller-supplied `Custom` strategies, which cannot be
    /// persisted.
    async fn merge_task_results(
        &self,
        source_task_ids: &[TaskId],
        strategy: &MergeStrategy,
    ) -> Result<MergedResult, CoordinationError>;

    /// Instantiate a registered pattern for a ticket: initial task, fan
    /// out, sync points, join, merge, with `${placeholders}` resolved
    /// from `context`.
    async fn apply_pattern(
        &self,
        ticket_id: TicketId,
        pattern_name: &str,
        context: &HashMap<String, String>,
    ) -> Result<AppliedPattern, CoordinationError>;

    /// Re-evaluate every pending entity watching a settled task. Invoked
    /// by the scheduler's settlement hook.
    async fn on_task_settled(&self, task: &Task) -> Result<(), CoordinationError>;
}

/// Standard implementation of CoordinationEngine.
pub struct StandardCoordinationEngine {
    sync_points: Arc<dyn SyncPointRepository>,
    joins: Arc<dyn JoinRepository>,
    merges: Arc<dyn MergeRepository>,
    tasks: Arc<dyn TaskRepository>,
    registry: Arc<PatternRegistry>,
    event_bus: Arc<EventBus>,
    default_sync_timeout: Option<Duration>,
}

impl StandardCoordinationEngine {
    pub fn new(
        sync_points: Arc<dyn SyncPointRepository>,
        joins: Arc<dyn JoinRepository>,
        merges: Arc<dyn MergeRepository>,
        tasks: Arc<dyn TaskRepository>,
        registry: Arc<PatternRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            sync_points,
            joins,
            merges,
            tasks,
            registry,
            event_bus,
            default_sync_timeout: None,
        }
    }

    /// Timeout applied to sync points whose spec does not carry one.
    pub fn with_default_sync_timeout(mut self, timeout: Duration) -> Self {
        self.default_sync_timeout = Some(timeout);
        self
    }

    /// Fetch tasks by id, insisting that all of them exist.
    async fn require_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>, CoordinationError> {
        let tasks = self.tasks.find_by_ids(ids).await?;
        if tasks.len() != ids.len() {
            let known: HashSet<TaskId> = tasks.iter().map(|task| task.id).collect();
            let missing = ids
                .iter()
                .find(|id| !known.contains(id))
                .copied()
                .unwrap_or_else(TaskId::new);
            return Err(CoordinationError::UnknownEntity {
                kind: EntityKind::Task,
                id: missing.to_string(),
            });
        }
        Ok(tasks)
    }

    /// Insert a task created by the engine itself (continuations, pattern
    /// tasks) and announce it.
    async fn insert_task(&self, spec: NewTask) -> Result<Task, CoordinationError> {
        let task = self.tasks.insert(Task::new(spec)).await?;
        self.event_bus.publish_task_event(TaskEvent::TaskCreated {
            task_id: task.id,
            ticket_id: task.ticket_id,
            task_type: task.task_type.clone(),
            priority: task.priority,
            created_at: task.created_at,
        });
        Ok(task)
    }

    async fn evaluate_sync_point(
        &self,
        sync_point: &SyncPoint,
    ) -> Result<SyncPoint, CoordinationError> {
        if sync_point.status != SyncPointStatus::Pending {
            return Ok(sync_point.clone());
        }
        let watched = self.tasks.find_by_ids(&sync_point.waiting_task_ids).await?;
        let completed = watched
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .count();
        let dead = watched
            .iter()
            .filter(|task| matches!(task.status, TaskStatus::Failed | TaskStatus::Blocked))
            .count();

        if sync_point.threshold_met(completed) {
            if let Some(satisfied) = self.sync_points.try_satisfy(sync_point.id).await? {
                info!(
                    "Sync point {} satisfied ({}/{} watched tasks completed)",
                    sync_point.id,
                    completed,
                    sync_point.waiting_task_ids.len()
                );
                self.event_bus
                    .publish_coordination_event(CoordinationEvent::SyncPointSatisfied {
                        sync_point_id: sync_point.id,
                        satisfied_at: satisfied.satisfied_at.unwrap_or_else(Utc::now),
                    });
                return Ok(satisfied);
            }
        } else if sync_point.waiting_task_ids.len() - dead < sync_point.required_count {
            // Not enough live tasks remain to ever reach the threshold.
            let reason = format!(
                "{} of {} watched tasks can no longer complete",
                dead,
                sync_point.waiting_task_ids.len()
            );
            if let Some(failed) = self.sync_points.try_fail(sync_point.id, &reason).await? {
                warn!("Sync point {} failed: {}", sync_point.id, reason);
                self.event_bus
                    .publish_coordination_event(CoordinationEvent::SyncPointFailed {
                        sync_point_id: sync_point.id,
                        reason,
                        failed_at: Utc::now(),
                    });
                return Ok(failed);
            }
        }
        self.get_sync_point(sync_point.id).await
    }

    /// Fail a pending sync point as timed out. `Some` only when this call
    /// won the settle race.
    async fn mark_timed_out(
        &self,
        sync_point: &SyncPoint,
    ) -> Result<Option<SyncPoint>, CoordinationError> {
        if sync_point.status != SyncPointStatus::Pending {
            return Ok(None);
        }
        let reason = match sync_point.timeout {
            Some(timeout) => format!("timed out after {timeout:?}"),
            None => "timed out".to_string(),
        };
        match self.sync_points.try_time_out(sync_point.id, &reason).await? {
            Some(failed) => {
                warn!("Sync point {} timed out", sync_point.id);
                self.event_bus
                    .publish_coordination_event(CoordinationEvent::SyncPointTimedOut {
                        sync_point_id: sync_point.id,
                        timed_out_at: Utc::now(),
                    });
                Ok(Some(failed))
            }
            None => Ok(None),
        }
    }

    fn failed_sync_point_error(&self, sync_point: &SyncPoint) -> CoordinationError {
        if sync_point.timed_out {
            CoordinationError::SyncPointTimeout {
                sync_point_id: sync_point.id,
            }
        } else {
            CoordinationError::SyncPointFailed {
                sync_point_id: sync_point.id,
                reason: sync_point
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "sync point failed".to_string()),
            }
        }
    }

    async fn evaluate_join(
        &self,
        join: &JoinContinuation,
    ) -> Result<JoinContinuation, CoordinationError> {
        if join.status != JoinStatus::Pending {
            return Ok(join.clone());
        }
        let sources = self.tasks.find_by_ids(&join.source_task_ids).await?;
        let statuses: HashMap<TaskId, TaskStatus> = sources
            .iter()
            .map(|task| (task.id, task.status))
            .collect();
        let snapshot: Vec<(TaskId, TaskStatus)> = join
            .source_task_ids
            .iter()
            .map(|id| (*id, statuses.get(id).copied().unwrap_or(TaskStatus::Pending)))
            .collect();

        match join.gate.evaluate(&snapshot) {
            GateDecision::Pending => Ok(join.clone()),
            GateDecision::Satisfied { satisfied_sources } => {
                // CAS first, so exactly one evaluation spawns the
                // continuation.
                let Some(mut satisfied) = self.joins.try_mark_satisfied(join.id).await? else {
                    return self.get_join(join.id).await;
                };
                let continuation = self
                    .spawn_continuation(&satisfied, &satisfied_sources, &sources)
                    .await?;
                self.joins
                    .set_continuation_task(satisfied.id, continuation.id)
                    .await?;
                satisfied.continuation_task_id = Some(continuation.id);
                info!(
                    "Join {} satisfied; continuation task {} created",
                    join.id, continuation.id
                );
                self.event_bus
                    .publish_coordination_event(CoordinationEvent::JoinSatisfied {
                        join_id: join.id,
                        continuation_task_id: continuation.id,
                        satisfied_at: satisfied.satisfied_at.unwrap_or_else(Utc::now),
                    });
                Ok(satisfied)
            }
            GateDecision::Failed { reason } => {
                match self.joins.try_fail(join.id, &reason).await? {
                    Some(failed) => {
                        warn!("Join {} failed: {}", join.id, reason);
                        self.event_bus
                            .publish_coordination_event(CoordinationEvent::JoinFailed {
                                join_id: join.id,
                                reason,
                                failed_at: Utc::now(),
                            });
                        Ok(failed)
                    }
                    None => self.get_join(join.id).await,
                }
            }
        }
    }

    /// Create the continuation task for a satisfied join. It depends on
    /// the satisfied sources; phase and priority fall back to the first
    /// source when the continuation spec leaves them out.
    async fn spawn_continuation(
        &self,
        join: &JoinContinuation,
        satisfied_sources: &[TaskId],
        sources: &[Task],
    ) -> Result<Task, CoordinationError> {
        let template = &join.continuation;
        let first = sources.first();
        let phase = template
            .phase
            .clone()
            .or_else(|| first.map(|task| task.phase.clone()))
            .unwrap_or_else(|| "join".to_string());
        let priority = template
            .priority
            .or_else(|| first.map(|task| task.priority))
            .unwrap_or_default();
        let mut spec = NewTask::new(join.ticket_id, phase, template.task_type.clone())
            .with_priority(priority)
            .with_dependencies(satisfied_sources.to_vec())
            .with_capabilities(template.required_capabilities.clone());
        if let Some(input) = template.input.clone() {
            spec = spec.with_input(input);
        }
        self.insert_task(spec).await
    }

    async fn fail_merge(
        &self,
        id: MergeId,
        reason: String,
    ) -> Result<MergeRecord, CoordinationError> {
        match self.merges.try_fail(id, &reason).await? {
            Some(failed) => {
                warn!("Merge {} failed: {}", id, reason);
                self.event_bus
                    .publish_coordination_event(CoordinationEvent::MergeFailed {
                        merge_id: id,
                        reason,
                        failed_at: Utc::now(),
                    });
                Ok(failed)
            }
            None => self.get_merge(id).await,
        }
    }

    async fn evaluate_merge(&self, record: &MergeRecord) -> Result<MergeRecord, CoordinationError> {
        if record.status != MergeStatus::Pending {
            return Ok(record.clone());
        }
        let sources = self.tasks.find_by_ids(&record.source_task_ids).await?;
        if let Some(dead) = sources
            .iter()
            .find(|task| matches!(task.status, TaskStatus::Failed | TaskStatus::Blocked))
        {
            let reason = format!("source task {} is {}", dead.id, dead.status);
            return self.fail_merge(record.id, reason).await;
        }
        if sources.len() != record.source_task_ids.len()
            || sources.iter().any(|task| task.status != TaskStatus::Completed)
        {
            return Ok(record.clone());
        }

        // Payloads in declared source order, never completion order.
        let payloads: Vec<serde_json::Value> = sources
            .iter()
            .map(|task| task.result.clone().unwrap_or(serde_json::Value::Null))
            .collect();
        match record.kind.to_strategy().apply(&payloads) {
            Ok(output) => match self.merges.try_complete(record.id, output).await? {
                Some(merged) => {
                    info!(
                        "Merge {} completed over {} sources",
                        record.id,
                        sources.len()
                    );
                    self.event_bus
                        .publish_coordination_event(CoordinationEvent::ResultsMerged {
                            merge_id: record.id,
                            source_count: sources.len(),
                            strategy: record.kind.as_str().to_string(),
                            merged_at: merged.merged_at.unwrap_or_else(Utc::now),
                        });
                    Ok(merged)
                }
                None => self.get_merge(record.id).await,
            },
            Err(err) => self.fail_merge(record.id, err.to_string()).await,
        }
    }

    async fn create_shaped_task(
        &self,
        ticket_id: TicketId,
        shape: &TaskShape,
        dependencies: Vec<TaskId>,
    ) -> Result<Task, CoordinationError> {
        let mut spec = NewTask::new(
            ticket_id,
            shape.phase.clone().unwrap_or_else(|| shape.name.clone()),
            shape.task_type.clone(),
        )
        .with_priority(shape.priority.unwrap_or_default())
        .with_dependencies(dependencies)
        .with_capabilities(shape.required_capabilities.clone());
        if let Some(input) = shape.input.clone() {
            spec = spec.with_input(input);
        }
        self.insert_task(spec).await
    }
}

fn resolve_refs(task_ids: &HashMap<String, TaskId>, names: &[String]) -> Vec<TaskId> {
    names
        .iter()
        .filter_map(|name| task_ids.get(name).copied())
        .collect()
}

#[async_trait]
impl CoordinationEngine for StandardCoordinationEngine {
    async fn create_sync_point(
        &self,
        mut spec: SyncPointSpec,
    ) -> Result<SyncPoint, CoordinationError> {
        // Step 1: Watched tasks must exist
        self.require_tasks(&spec.waiting_task_ids).await?;

        // Step 2: Fill in the configured default timeout
        if spec.timeout.is_none() {
            spec.timeout = self.default_sync_timeout;
        }
        let sync_point = SyncPoint::new(spec)?;
        self.sync_points.insert(sync_point.clone()).await?;
        info!(
            "Created sync point {} over {} tasks (required {})",
            sync_point.id,
            sync_point.waiting_task_ids.len(),
            sync_point.required_count
        );
        self.event_bus
            .publish_coordination_event(CoordinationEvent::SyncPointCreated {
                sync_point_id: sync_point.id,
                ticket_id: sync_point.ticket_id,
                waiting_count: sync_point.waiting_task_ids.len(),
                required_count: sync_point.required_count,
                created_at: sync_point.created_at,
            });

        // Step 3: Watched tasks may already be settled
        self.evaluate_sync_point(&sync_point).await
    }

    async fn get_sync_point(&self, id: SyncPointId) -> Result<SyncPoint, CoordinationError> {
        self.sync_points
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoordinationError::UnknownEntity {
                kind: EntityKind::SyncPoint,
                id: id.to_string(),
            })
    }

    async fn await_sync_point(&self, id: SyncPointId) -> Result<SyncPoint, CoordinationError> {
        // Subscribe before the first state check so a satisfaction landing
        // in between cannot be missed.
        let mut receiver = self.event_bus.subscribe_sync_point(id);
        let mut sync_point = self.get_sync_point(id).await?;

        loop {
            match sync_point.status {
                SyncPointStatus::Satisfied => return Ok(sync_point),
                SyncPointStatus::Failed => return Err(self.failed_sync_point_error(&sync_point)),
                SyncPointStatus::Pending => {}
            }

            let remaining = sync_point
                .deadline
                .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO));

            let event = match remaining {
                Some(remaining) => {
                    match tokio::time::timeout(remaining, receiver.recv()).await {
                        Ok(event) => event,
                        Err(_) => {
                            // Deadline passed while waiting.
                            self.mark_timed_out(&sync_point).await?;
                            sync_point = self.get_sync_point(id).await?;
                            continue;
                        }
                    }
                }
                None => receiver.recv().await,
            };

            match event {
                Ok(_) => {
                    sync_point = self.get_sync_point(id).await?;
                }
                Err(EventBusError::Lagged(skipped)) => {
                    warn!(
                        "Sync point {} waiter lagged {} events; re-checking state",
                        id, skipped
                    );
                    sync_point = self.get_sync_point(id).await?;
                }
                Err(_) => {
                    sync_point = self.get_sync_point(id).await?;
                    if sync_point.status == SyncPointStatus::Pending {
                        return Err(CoordinationError::SyncPointFailed {
                            sync_point_id: id,
                            reason: "event bus closed while waiting".to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn check_overdue_sync_points(&self) -> Result<Vec<SyncPoint>, CoordinationError> {
        let now = Utc::now();
        let mut timed_out = Vec::new();
        for sync_point in self.sync_points.list_pending().await? {
            if sync_point.is_overdue(now) {
                if let Some(failed) = self.mark_timed_out(&sync_point).await? {
                    timed_out.push(failed);
                }
            }
        }
        if !timed_out.is_empty() {
            debug!("Timed out {} overdue sync points", timed_out.len());
        }
        Ok(timed_out)
    }

    async fn register_join(
        &self,
        ticket_id: TicketId,
        spec: JoinSpec,
    ) -> Result<JoinContinuation, CoordinationError> {
        self.require_tasks(&spec.source_task_ids).await?;
        let join = JoinContinuation::new(ticket_id, spec)?;
        self.joins.insert(join.clone()).await?;
        info!(
            "Registered {} join {} over {} sources",
            join.gate,
            join.id,
            join.source_task_ids.len()
        );
        self.event_bus
            .publish_coordination_event(CoordinationEvent::JoinRegistered {
                join_id: join.id,
                ticket_id,
                gate: join.gate,
                source_count: join.source_task_ids.len(),
                registered_at: join.created_at,
            });

        // Sources may already be settled.
        self.evaluate_join(&join).await
    }

    async fn get_join(&self, id: JoinId) -> Result<JoinContinuation, CoordinationError> {
        self.joins
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoordinationError::UnknownEntity {
                kind: EntityKind::Join,
                id: id.to_string(),
            })
    }

    async fn register_merge(
        &self,
        ticket_id: Option<TicketId>,
        source_task_ids: Vec<TaskId>,
        kind: MergeKind,
    ) -> Result<MergeRecord, CoordinationError> {
        self.require_tasks(&source_task_ids).await?;
        let record = MergeRecord::new(ticket_id, source_task_ids, kind)?;
        self.merges.insert(record.clone()).await?;
        debug!(
            "Registered {} merge {} over {} sources",
            kind.as_str(),
            record.id,
            record.source_task_ids.len()
        );

        self.evaluate_merge(&record).await
    }

    async fn get_merge(&self, id: MergeId) -> Result<MergeRecord, CoordinationError> {
        self.merges
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoordinationError::UnknownEntity {
                kind: EntityKind::Merge,
                id: id.to_string(),
            })
    }

    async fn merge_task_results(
        &self,
        source_task_ids: &[TaskId],
        strategy: &MergeStrategy,
    ) -> Result<MergedResult, CoordinationError> {
        let sources = self.require_tasks(source_task_ids).await?;
        if let Some(unfinished) = sources
            .iter()
            .find(|task| task.status != TaskStatus::Completed)
        {
            return Err(CoordinationError::NotReady {
                task_id: unfinished.id,
                reason: format!("merge source is {}", unfinished.status),
            });
        }
        let payloads: Vec<serde_json::Value> = sources
            .iter()
            .map(|task| task.result.clone().unwrap_or(serde_json::Value::Null))
            .collect();
        let output = strategy.apply(&payloads)?;
        debug!(
            "Merged {} results with {} strategy",
            sources.len(),
            strategy.name()
        );
        Ok(MergedResult {
            source_task_ids: source_task_ids.to_vec(),
            strategy: strategy.name().to_string(),
            output,
            merged_at: Utc::now(),
        })
    }

    async fn apply_pattern(
        &self,
        ticket_id: TicketId,
        pattern_name: &str,
        context: &HashMap<String, String>,
    ) -> Result<AppliedPattern, CoordinationError> {
        // Step 1: Load and resolve the template
        let template =
            self.registry
                .get(pattern_name)
                .ok_or_else(|| CoordinationError::UnknownEntity {
                    kind: EntityKind::Pattern,
                    id: pattern_name.to_string(),
                })?;
        let resolved = template.resolve(context)?;

        // Step 2: Create the initial task
        let initial = self
            .create_shaped_task(ticket_id, &resolved.initial_task, Vec::new())
            .await?;
        let mut task_ids = HashMap::new();
        task_ids.insert(resolved.initial_task.name.clone(), initial.id);

        // Step 3: Fan out, each subtask depending on the initial task
        for shape in &resolved.fan_out {
            let task = self
                .create_shaped_task(ticket_id, shape, vec![initial.id])
                .await?;
            task_ids.insert(shape.name.clone(), task.id);
        }

        // Step 4: Sync points over the created tasks
        let mut sync_point_ids = Vec::new();
        for shape in &resolved.sync_points {
            let spec = SyncPointSpec {
                ticket_id: Some(ticket_id),
                waiting_task_ids: resolve_refs(&task_ids, &shape.tasks),
                required_count: shape.required_count,
                timeout: shape.timeout,
            };
            sync_point_ids.push(self.create_sync_point(spec).await?.id);
        }

        // Step 5: Join, continuation depending on its sources
        let join_id = match &resolved.join {
            Some(shape) => {
                let spec = JoinSpec {
                    source_task_ids: resolve_refs(&task_ids, &shape.sources),
                    gate: shape.gate,
                    continuation: shape.continuation.clone(),
                };
                Some(self.register_join(ticket_id, spec).await?.id)
            }
            None => None,
        };

        // Step 6: Merge over declared sources
        let merge_id = match &resolved.merge {
            Some(shape) => Some(
                self.register_merge(
                    Some(ticket_id),
                    resolve_refs(&task_ids, &shape.sources),
                    shape.strategy,
                )
                .await?
                .id,
            ),
            None => None,
        };

        let task_count = task_ids.len();
        info!(
            "Applied pattern '{}' to ticket {}: {} tasks created",
            resolved.name, ticket_id, task_count
        );
        self.event_bus
            .publish_coordination_event(CoordinationEvent::PatternApplied {
                pattern_name: resolved.name.clone(),
                ticket_id,
                task_count,
                applied_at: Utc::now(),
            });

        Ok(AppliedPattern {
            pattern_name: resolved.name,
            ticket_id,
            initial_task_id: initial.id,
            task_ids,
            sync_point_ids,
            join_id,
            merge_id,
        })
    }

    async fn on_task_settled(&self, task: &Task) -> Result<(), CoordinationError> {
        debug!("Re-evaluating coordination entities watching task {}", task.id);
        for sync_point in self.sync_points.watching(task.id).await? {
            self.evaluate_sync_point(&sync_point).await?;
        }
        for join in self.joins.watching(task.id).await? {
            self.evaluate_join(&join).await?;
        }
        for merge in self.merges.watching(task.id).await? {
            self.evaluate_merge(&merge).await?;
        }
        Ok(())
    }
}
