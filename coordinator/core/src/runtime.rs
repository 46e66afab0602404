// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinator Runtime
//!
//! Composition root for the coordination engine. Builds the stores, the
//! event bus, the pattern registry, and the four application services from
//! a [`CoordinatorConfig`], then wires the cross-service plumbing:
//!
//! - settled tasks release the locks they hold
//! - settled tasks re-evaluate the sync points, joins, and merges
//!   watching them
//!
//! Also owns the maintenance loop that sweeps expired locks and overdue
//! sync points on the configured interval.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::{
    AgentStateMachine, CoordinationEngine, LockManager, StandardAgentStateMachine,
    StandardCoordinationEngine, StandardLockManager, StandardTaskScheduler, TaskScheduler,
};
use crate::config::CoordinatorConfig;
use crate::domain::agent::{AgentId, AgentStatus, TransitionRequest};
use crate::domain::error::CoordinationError;
use crate::domain::task::Task;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::memory::{
    InMemoryAgentRepository, InMemoryJoinRepository, InMemoryLockRepository,
    InMemoryMergeRepository, InMemorySyncPointRepository, InMemoryTaskRepository,
};
use crate::infrastructure::pattern_registry::PatternRegistry;

/// One fully wired coordination engine.
pub struct Coordinator {
    config: CoordinatorConfig,
    event_bus: Arc<EventBus>,
    registry: Arc<PatternRegistry>,
    scheduler: Arc<StandardTaskScheduler>,
    locks: Arc<StandardLockManager>,
    lifecycle: Arc<StandardAgentStateMachine>,
    coordination: Arc<StandardCoordinationEngine>,
}

impl Coordinator {
    /// Build a coordinator over in-memory stores.
    pub fn in_memory(config: CoordinatorConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.spec.events.bus_capacity));
        let registry = Arc::new(PatternRegistry::new());

        let tasks = Arc::new(InMemoryTaskRepository::new());
        let scheduler = Arc::new(
            StandardTaskScheduler::new(tasks.clone(), event_bus.clone())
                .with_default_ready_limit(config.spec.scheduler.ready_batch_limit),
        );
        let locks = Arc::new(StandardLockManager::new(
            Arc::new(InMemoryLockRepository::new()),
            event_bus.clone(),
        ));
        let lifecycle = Arc::new(StandardAgentStateMachine::new(
            Arc::new(InMemoryAgentRepository::new()),
            event_bus.clone(),
        ));
        let mut engine = StandardCoordinationEngine::new(
            Arc::new(InMemorySyncPointRepository::new()),
            Arc::new(InMemoryJoinRepository::new()),
            Arc::new(InMemoryMergeRepository::new()),
            tasks,
            registry.clone(),
            event_bus.clone(),
        );
        if let Some(timeout) = config.spec.coordination.default_sync_timeout {
            engine = engine.with_default_sync_timeout(timeout);
        }
        let coordination = Arc::new(engine);

        // A settled task keeps no locks.
        let hook_locks = locks.clone();
        scheduler.register_settlement_hook(Arc::new(move |task: Task| {
            let locks = hook_locks.clone();
            Box::pin(async move {
                if let Err(err) = locks.release_task_locks(task.id).await {
                    error!("Failed to release locks for settled task {}: {}", task.id, err);
                }
            })
        }));

        // A settled task wakes everything watching it.
        let hook_engine = coordination.clone();
        scheduler.register_settlement_hook(Arc::new(move |task: Task| {
            let engine = hook_engine.clone();
            Box::pin(async move {
                if let Err(err) = engine.on_task_settled(&task).await {
                    error!(
                        "Coordination re-evaluation failed for settled task {}: {}",
                        task.id, err
                    );
                }
            })
        }));

        info!(
            "Coordinator '{}' wired (ready batch {}, bus capacity {})",
            config.metadata.name,
            config.spec.scheduler.ready_batch_limit,
            config.spec.events.bus_capacity
        );

        Self {
            config,
            event_bus,
            registry,
            scheduler,
            locks,
            lifecycle,
            coordination,
        }
    }

    /// Build from a YAML manifest on disk.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let config = CoordinatorConfig::from_yaml_file(path)?;
        Ok(Self::in_memory(config))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn pattern_registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> Arc<dyn TaskScheduler> {
        self.scheduler.clone()
    }

    pub fn lock_manager(&self) -> Arc<dyn LockManager> {
        self.locks.clone()
    }

    pub fn lifecycle(&self) -> Arc<dyn AgentStateMachine> {
        self.lifecycle.clone()
    }

    pub fn coordination(&self) -> Arc<dyn CoordinationEngine> {
        self.coordination.clone()
    }

    /// Terminate an agent and release every lock it still holds. Returns
    /// the number of locks released.
    pub async fn retire_agent(
        &self,
        agent_id: AgentId,
        reason: &str,
        triggered_by: &str,
    ) -> Result<usize, CoordinationError> {
        self.lifecycle
            .record_transition(TransitionRequest::new(
                agent_id,
                AgentStatus::Terminated,
                reason,
                triggered_by,
            ))
            .await?;
        let released = self.locks.release_agent_locks(agent_id).await?;
        if released > 0 {
            info!("Released {} locks held by retired agent {}", released, agent_id);
        }
        Ok(released)
    }

    /// One maintenance sweep: expire overdue locks, time out overdue sync
    /// points.
    pub async fn maintenance_tick(&self) -> Result<(), CoordinationError> {
        let expired = self.locks.cleanup_expired().await?;
        let timed_out = self.coordination.check_overdue_sync_points().await?;
        if !expired.is_empty() || !timed_out.is_empty() {
            info!(
                "Maintenance sweep: {} expired locks, {} timed-out sync points",
                expired.len(),
                timed_out.len()
            );
        }
        Ok(())
    }

    /// Start the background maintenance loop on the configured sweep
    /// interval. Runs until the returned handle is aborted.
    pub fn start_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.spec.locks.sweep_interval;
        info!("Starting maintenance loop (sweep every {:?})", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh
            // coordinator does not sweep before anything exists.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.maintenance_tick().await {
                    error!("Maintenance sweep failed: {}", err);
                }
            }
        })
    }
}
