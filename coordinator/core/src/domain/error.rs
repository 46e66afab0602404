// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination failure modes surfaced by the application services.
//!
//! Contention outcomes (`NotReady`, `AlreadyAssigned`, `LockConflict`) are
//! expected under concurrent callers and are safe to retry; the rest
//! indicate a caller bug or an unsatisfiable request.

use thiserror::Error;

use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::coordination::{CoordinationSpecError, JoinId, MergeError, SyncPointId};
use crate::domain::lock::{LockMode, ResourceRef};
use crate::domain::pattern::PatternError;
use crate::domain::repository::RepositoryError;
use crate::domain::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Task,
    Agent,
    Lock,
    SyncPoint,
    Join,
    Merge,
    Pattern,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Task => "task",
            EntityKind::Agent => "agent",
            EntityKind::Lock => "lock",
            EntityKind::SyncPoint => "sync point",
            EntityKind::Join => "join",
            EntityKind::Merge => "merge",
            EntityKind::Pattern => "pattern",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Task {task_id} is not ready: {reason}")]
    NotReady { task_id: TaskId, reason: String },

    #[error("Task {task_id} was already assigned by a concurrent caller")]
    AlreadyAssigned { task_id: TaskId },

    #[error("Task {task_id} is {status}, expected {expected}")]
    InvalidTaskState {
        task_id: TaskId,
        status: TaskStatus,
        expected: &'static str,
    },

    #[error("{mode} lock on {resource} conflicts with a lock held by agent {holder}")]
    LockConflict {
        resource: ResourceRef,
        mode: LockMode,
        holder: AgentId,
    },

    #[error("Agent {agent_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        agent_id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
    },

    #[error("Sync point {sync_point_id} timed out before its threshold was met")]
    SyncPointTimeout { sync_point_id: SyncPointId },

    #[error("Sync point {sync_point_id} failed: {reason}")]
    SyncPointFailed {
        sync_point_id: SyncPointId,
        reason: String,
    },

    #[error("Join {join_id} failed: {reason}")]
    JoinFailed { join_id: JoinId, reason: String },

    #[error("Unknown {kind}: {id}")]
    UnknownEntity { kind: EntityKind, id: String },

    #[error("Invalid coordination spec: {0}")]
    InvalidSpec(#[from] CoordinationSpecError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl CoordinationError {
    /// Contention outcomes a caller may retry after backoff. Everything
    /// else is a hard failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::NotReady { .. }
                | CoordinationError::AlreadyAssigned { .. }
                | CoordinationError::LockConflict { .. }
        )
    }

    /// Adapter for repository calls keyed by id: maps the store's
    /// `NotFound` onto `UnknownEntity`, passing other faults through.
    pub fn map_not_found(
        kind: EntityKind,
        id: impl std::fmt::Display,
    ) -> impl FnOnce(RepositoryError) -> CoordinationError {
        let id = id.to_string();
        move |err| match err {
            RepositoryError::NotFound(_) => CoordinationError::UnknownEntity { kind, id },
            other => CoordinationError::Repository(other),
        }
    }
}
