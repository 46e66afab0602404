// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resource Lock Manager
//!
//! Application service over the lock store: acquire/release with conflict
//! detection, holder-scoped bulk release, and the expired-hold sweep.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Mutual exclusion over named resources
//! - **Collaborators:**
//!   - Domain: ResourceLock aggregate, LockRepository
//!   - Infrastructure: EventBus

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::error::{CoordinationError, EntityKind};
use crate::domain::events::LockEvent;
use crate::domain::lock::{
    AcquireOutcome, LockId, LockRequest, ReleaseOutcome, ResourceLock, ResourceRef,
};
use crate::domain::repository::LockRepository;
use crate::domain::task::TaskId;
use crate::infrastructure::event_bus::EventBus;

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Acquire or fail fast. A conflict surfaces as `LockConflict` naming
    /// the agent currently in the way; callers may retry after backoff.
    async fn acquire(&self, request: LockRequest) -> Result<ResourceLock, CoordinationError>;

    /// Acquire variant exposing the raw outcome instead of an error.
    async fn try_acquire(&self, request: LockRequest)
        -> Result<AcquireOutcome, CoordinationError>;

    /// Release by id. Releasing an already-released hold is a no-op.
    async fn release(&self, lock_id: LockId) -> Result<ResourceLock, CoordinationError>;

    /// True when any active hold exists on the resource.
    async fn is_held(&self, resource: &ResourceRef) -> Result<bool, CoordinationError>;

    async fn get_lock(&self, lock_id: LockId) -> Result<ResourceLock, CoordinationError>;

    /// Active holds, optionally narrowed to one agent and/or one task.
    async fn active_locks(
        &self,
        agent_id: Option<AgentId>,
        task_id: Option<TaskId>,
    ) -> Result<Vec<ResourceLock>, CoordinationError>;

    /// Release every active hold owned by the task; returns the count.
    /// Dispatcher cleanup when a task settles.
    async fn release_task_locks(&self, task_id: TaskId) -> Result<usize, CoordinationError>;

    /// Release every active hold owned by the agent; returns the count.
    /// Dispatcher cleanup when an agent dies or terminates.
    async fn release_agent_locks(&self, agent_id: AgentId) -> Result<usize, CoordinationError>;

    /// Sweep marking expired holds released. Conflict checks never depend
    /// on the sweep having run; this is hygiene plus an event per
    /// reclaimed hold.
    async fn cleanup_expired(&self) -> Result<Vec<ResourceLock>, CoordinationError>;
}

/// Standard implementation of LockManager.
pub struct StandardLockManager {
    locks: Arc<dyn LockRepository>,
    event_bus: Arc<EventBus>,
}

impl StandardLockManager {
    pub fn new(locks: Arc<dyn LockRepository>, event_bus: Arc<EventBus>) -> Self {
        Self { locks, event_bus }
    }

    fn publish_released(&self, lock: &ResourceLock) {
        self.event_bus.publish_lock_event(LockEvent::LockReleased {
            lock_id: lock.id,
            resource: lock.resource.clone(),
            released_at: lock.released_at.unwrap_or_else(Utc::now),
        });
    }
}

#[async_trait]
impl LockManager for StandardLockManager {
    async fn acquire(&self, request: LockRequest) -> Result<ResourceLock, CoordinationError> {
        let resource = request.resource.clone();
        let mode = request.mode;
        match self.try_acquire(request).await? {
            AcquireOutcome::Acquired(lock) => Ok(lock),
            AcquireOutcome::Conflict { blocking } => {
                warn!(
                    "{} lock on {} blocked by agent {}",
                    mode, resource, blocking.holder.agent_id
                );
                Err(CoordinationError::LockConflict {
                    resource,
                    mode,
                    holder: blocking.holder.agent_id,
                })
            }
        }
    }

    async fn try_acquire(
        &self,
        request: LockRequest,
    ) -> Result<AcquireOutcome, CoordinationError> {
        let outcome = self.locks.try_acquire(request).await?;
        if let AcquireOutcome::Acquired(lock) = &outcome {
            info!(
                "Agent {} acquired {} lock on {}",
                lock.holder.agent_id, lock.mode, lock.resource
            );
            self.event_bus.publish_lock_event(LockEvent::LockAcquired {
                lock_id: lock.id,
                resource: lock.resource.clone(),
                mode: lock.mode,
                agent_id: lock.holder.agent_id,
                acquired_at: lock.acquired_at,
            });
        }
        Ok(outcome)
    }

    async fn release(&self, lock_id: LockId) -> Result<ResourceLock, CoordinationError> {
        match self
            .locks
            .release(lock_id)
            .await
            .map_err(CoordinationError::map_not_found(EntityKind::Lock, lock_id))?
        {
            ReleaseOutcome::Released(lock) => {
                debug!("Released lock {} on {}", lock.id, lock.resource);
                self.publish_released(&lock);
                Ok(lock)
            }
            ReleaseOutcome::AlreadyReleased(lock) => {
                debug!("Lock {} was already released", lock.id);
                Ok(lock)
            }
        }
    }

    async fn is_held(&self, resource: &ResourceRef) -> Result<bool, CoordinationError> {
        Ok(!self.locks.active_for_resource(resource).await?.is_empty())
    }

    async fn get_lock(&self, lock_id: LockId) -> Result<ResourceLock, CoordinationError> {
        self.locks
            .find_by_id(lock_id)
            .await?
            .ok_or_else(|| CoordinationError::UnknownEntity {
                kind: EntityKind::Lock,
                id: lock_id.to_string(),
            })
    }

    async fn active_locks(
        &self,
        agent_id: Option<AgentId>,
        task_id: Option<TaskId>,
    ) -> Result<Vec<ResourceLock>, CoordinationError> {
        Ok(self.locks.active_locks(agent_id, task_id).await?)
    }

    async fn release_task_locks(&self, task_id: TaskId) -> Result<usize, CoordinationError> {
        let released = self.locks.release_for_task(task_id).await?;
        for lock in &released {
            self.publish_released(lock);
        }
        if !released.is_empty() {
            info!(
                "Released {} locks held by task {}",
                released.len(),
                task_id
            );
        }
        Ok(released.len())
    }

    async fn release_agent_locks(&self, agent_id: AgentId) -> Result<usize, CoordinationError> {
        let released = self.locks.release_for_agent(agent_id).await?;
        for lock in &released {
            self.publish_released(lock);
        }
        if !released.is_empty() {
            info!(
                "Released {} locks held by agent {}",
                released.len(),
                agent_id
            );
        }
        Ok(released.len())
    }

    async fn cleanup_expired(&self) -> Result<Vec<ResourceLock>, CoordinationError> {
        let now = Utc::now();
        let expired = self.locks.release_expired(now).await?;
        for lock in &expired {
            warn!("Lock {} on {} expired unreleased", lock.id, lock.resource);
            self.event_bus.publish_lock_event(LockEvent::LockExpired {
                lock_id: lock.id,
                resource: lock.resource.clone(),
                expired_at: lock.expires_at.unwrap_or(now),
            });
        }
        Ok(expired)
    }
}
