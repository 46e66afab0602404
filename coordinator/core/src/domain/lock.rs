// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resource locks: exclusive/shared holds over named resources with
//! optional TTL expiry.
//!
//! Expiry is the crash-recovery path. A holder that dies without releasing
//! leaves a hold that simply stops counting in conflict checks once
//! `expires_at` passes; no explicit cleanup is required for correctness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(pub Uuid);

impl LockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Exclusive,
    Shared,
}

impl LockMode {
    /// Exclusive conflicts with everything; shared only with exclusive.
    pub fn conflicts_with(&self, other: LockMode) -> bool {
        match self {
            LockMode::Exclusive => true,
            LockMode::Shared => other == LockMode::Exclusive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Exclusive => "exclusive",
            LockMode::Shared => "shared",
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Composite lock key: (`resource_type`, `resource_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// The agent (and optionally the task) a hold belongs to. Bulk release
/// works off either field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub agent_id: AgentId,
    pub task_id: Option<TaskId>,
}

impl LockHolder {
    pub fn agent(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            task_id: None,
        }
    }

    pub fn task(agent_id: AgentId, task_id: TaskId) -> Self {
        Self {
            agent_id,
            task_id: Some(task_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockRequest {
    pub resource: ResourceRef,
    pub mode: LockMode,
    pub holder: LockHolder,
    pub ttl: Option<Duration>,
}

impl LockRequest {
    pub fn new(resource: ResourceRef, mode: LockMode, holder: LockHolder) -> Self {
        Self {
            resource,
            mode,
            holder,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub id: LockId,
    pub resource: ResourceRef,
    pub mode: LockMode,
    pub holder: LockHolder,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl ResourceLock {
    pub fn new(request: LockRequest) -> Self {
        let acquired_at = Utc::now();
        // A TTL too large for chrono means "effectively never expires".
        let expires_at = request
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| acquired_at + ttl);
        Self {
            id: LockId::new(),
            resource: request.resource,
            mode: request.mode,
            holder: request.holder,
            acquired_at,
            expires_at,
            released_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// Active means: not released and not past its TTL. Only active holds
    /// participate in conflict checks.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.released_at.is_none() && !self.is_expired(now)
    }

    /// Time left before TTL expiry; zero once past, `None` without a TTL.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| (expires_at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Outcome of an atomic acquire attempt. `Conflict` carries the hold that
/// blocked the request so callers can see who they are waiting on.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired(ResourceLock),
    Conflict { blocking: ResourceLock },
}

#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Released(ResourceLock),
    AlreadyReleased(ResourceLock),
}
