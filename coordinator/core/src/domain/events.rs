// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::coordination::{JoinGate, JoinId, MergeId, SyncPointId};
use crate::domain::lock::{LockId, LockMode, ResourceRef};
use crate::domain::task::{TaskId, TaskPriority, TicketId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    TaskCreated {
        task_id: TaskId,
        ticket_id: TicketId,
        task_type: String,
        priority: TaskPriority,
        created_at: DateTime<Utc>,
    },
    TaskAssigned {
        task_id: TaskId,
        agent_id: AgentId,
        assigned_at: DateTime<Utc>,
    },
    TaskStarted {
        task_id: TaskId,
        agent_id: AgentId,
        started_at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        agent_id: Option<AgentId>,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        agent_id: Option<AgentId>,
        error: String,
        failed_at: DateTime<Utc>,
    },
    TaskBlocked {
        task_id: TaskId,
        failed_dependency: TaskId,
        blocked_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LockEvent {
    LockAcquired {
        lock_id: LockId,
        resource: ResourceRef,
        mode: LockMode,
        agent_id: AgentId,
        acquired_at: DateTime<Utc>,
    },
    LockReleased {
        lock_id: LockId,
        resource: ResourceRef,
        released_at: DateTime<Utc>,
    },
    LockExpired {
        lock_id: LockId,
        resource: ResourceRef,
        expired_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentStateEvent {
    AgentRegistered {
        agent_id: AgentId,
        name: String,
        capabilities: Vec<String>,
        registered_at: DateTime<Utc>,
    },
    StatusChanged {
        agent_id: AgentId,
        from_status: AgentStatus,
        to_status: AgentStatus,
        reason: String,
        forced: bool,
        transitioned_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinationEvent {
    SyncPointCreated {
        sync_point_id: SyncPointId,
        ticket_id: Option<TicketId>,
        waiting_count: usize,
        required_count: usize,
        created_at: DateTime<Utc>,
    },
    SyncPointSatisfied {
        sync_point_id: SyncPointId,
        satisfied_at: DateTime<Utc>,
    },
    SyncPointTimedOut {
        sync_point_id: SyncPointId,
        timed_out_at: DateTime<Utc>,
    },
    SyncPointFailed {
        sync_point_id: SyncPointId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    JoinRegistered {
        join_id: JoinId,
        ticket_id: TicketId,
        gate: JoinGate,
        source_count: usize,
        registered_at: DateTime<Utc>,
    },
    JoinSatisfied {
        join_id: JoinId,
        continuation_task_id: TaskId,
        satisfied_at: DateTime<Utc>,
    },
    JoinFailed {
        join_id: JoinId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    ResultsMerged {
        merge_id: MergeId,
        source_count: usize,
        strategy: String,
        merged_at: DateTime<Utc>,
    },
    MergeFailed {
        merge_id: MergeId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    PatternApplied {
        pattern_name: String,
        ticket_id: TicketId,
        task_count: usize,
        applied_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    // ── TaskEvent serialization ───────────────────────────────────────────────

    #[test]
    fn test_task_event_created_serialization() {
        let task_id = TaskId::new();
        let event = TaskEvent::TaskCreated {
            task_id,
            ticket_id: TicketId::new(),
            task_type: "code-review".to_string(),
            priority: TaskPriority::High,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: TaskEvent = serde_json::from_str(&json).unwrap();
        if let TaskEvent::TaskCreated { task_id: id, task_type, .. } = deserialized {
            assert_eq!(id, task_id);
            assert_eq!(task_type, "code-review");
        } else {
            panic!("unexpected variant");
        }
    }

    #[test]
    fn test_task_event_blocked_serialization() {
        let event = TaskEvent::TaskBlocked {
            task_id: TaskId::new(),
            failed_dependency: TaskId::new(),
            blocked_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("TaskBlocked"));
        assert!(json.contains("failed_dependency"));
    }

    // ── LockEvent serialization ───────────────────────────────────────────────

    #[test]
    fn test_lock_event_acquired_serialization() {
        let event = LockEvent::LockAcquired {
            lock_id: LockId::new(),
            resource: ResourceRef::new("file", "src/main.rs"),
            mode: LockMode::Exclusive,
            agent_id: AgentId::new(),
            acquired_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: LockEvent = serde_json::from_str(&json).unwrap();
        if let LockEvent::LockAcquired { resource, mode, .. } = deserialized {
            assert_eq!(resource.resource_type, "file");
            assert_eq!(mode, LockMode::Exclusive);
        } else {
            panic!("unexpected variant");
        }
    }

    #[test]
    fn test_lock_event_expired_serialization() {
        let event = LockEvent::LockExpired {
            lock_id: LockId::new(),
            resource: ResourceRef::new("branch", "main"),
            expired_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("LockExpired"));
    }

    // ── AgentStateEvent serialization ─────────────────────────────────────────

    #[test]
    fn test_agent_state_event_status_changed_serialization() {
        let event = AgentStateEvent::StatusChanged {
            agent_id: AgentId::new(),
            from_status: AgentStatus::Running,
            to_status: AgentStatus::Degraded,
            reason: "heartbeat missed".to_string(),
            forced: false,
            transitioned_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: AgentStateEvent = serde_json::from_str(&json).unwrap();
        if let AgentStateEvent::StatusChanged { from_status, to_status, .. } = deserialized {
            assert_eq!(from_status, AgentStatus::Running);
            assert_eq!(to_status, AgentStatus::Degraded);
        } else {
            panic!("unexpected variant");
        }
    }

    // ── CoordinationEvent serialization ───────────────────────────────────────

    #[test]
    fn test_coordination_event_join_satisfied_serialization() {
        let event = CoordinationEvent::JoinSatisfied {
            join_id: JoinId::new(),
            continuation_task_id: TaskId::new(),
            satisfied_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("JoinSatisfied"));
        assert!(json.contains("continuation_task_id"));
    }

    #[test]
    fn test_coordination_event_pattern_applied_serialization() {
        let event = CoordinationEvent::PatternApplied {
            pattern_name: "fan-out-review".to_string(),
            ticket_id: TicketId::new(),
            task_count: 4,
            applied_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: CoordinationEvent = serde_json::from_str(&json).unwrap();
        if let CoordinationEvent::PatternApplied { pattern_name, task_count, .. } = deserialized {
            assert_eq!(pattern_name, "fan-out-review");
            assert_eq!(task_count, 4);
        } else {
            panic!("unexpected variant");
        }
    }

}
