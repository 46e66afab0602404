// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination primitives layered on the task store: sync points
//! (barriers), fan-in joins with continuations, and result merges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::task::{TaskId, TaskPriority, TaskStatus, TicketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncPointId(pub Uuid);

impl SyncPointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncPointId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinId(pub Uuid);

impl JoinId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JoinId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JoinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeId(pub Uuid);

impl MergeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MergeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MergeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum CoordinationSpecError {
    #[error("sync point needs at least one waiting task")]
    EmptyWaitingSet,
    #[error("required_count {required} outside 1..={waiting}")]
    InvalidRequiredCount { required: usize, waiting: usize },
    #[error("join needs at least one source task")]
    EmptySourceSet,
    #[error("merge needs at least one source task")]
    EmptyMergeSet,
}

// ============================================================================
// Sync points
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPointStatus {
    Pending,
    Satisfied,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SyncPointSpec {
    pub ticket_id: Option<TicketId>,
    pub waiting_task_ids: Vec<TaskId>,
    /// Defaults to the size of the waiting set ("all must complete").
    pub required_count: Option<usize>,
    pub timeout: Option<Duration>,
}

impl SyncPointSpec {
    pub fn all_of(waiting_task_ids: Vec<TaskId>) -> Self {
        Self {
            ticket_id: None,
            waiting_task_ids,
            required_count: None,
            timeout: None,
        }
    }

    pub fn quorum(waiting_task_ids: Vec<TaskId>, required_count: usize) -> Self {
        Self {
            ticket_id: None,
            waiting_task_ids,
            required_count: Some(required_count),
            timeout: None,
        }
    }

    pub fn for_ticket(mut self, ticket_id: TicketId) -> Self {
        self.ticket_id = Some(ticket_id);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A barrier over a fixed set of tasks. Satisfied exactly once, when the
/// number of completed watched tasks first reaches `required_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPoint {
    pub id: SyncPointId,
    pub ticket_id: Option<TicketId>,
    pub waiting_task_ids: Vec<TaskId>,
    pub required_count: usize,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// `created_at + timeout`; a pending sync point past this is failed.
    pub deadline: Option<DateTime<Utc>>,
    pub status: SyncPointStatus,
    pub created_at: DateTime<Utc>,
    pub satisfied_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// Set when the failure was a deadline expiry rather than watched tasks
    /// dying.
    #[serde(default)]
    pub timed_out: bool,
}

impl SyncPoint {
    pub fn new(spec: SyncPointSpec) -> Result<Self, CoordinationSpecError> {
        // Collapse duplicate ids so required_count counts distinct tasks.
        let mut waiting_task_ids = spec.waiting_task_ids;
        let mut seen = HashSet::new();
        waiting_task_ids.retain(|id| seen.insert(*id));

        let waiting = waiting_task_ids.len();
        if waiting == 0 {
            return Err(CoordinationSpecError::EmptyWaitingSet);
        }
        let required_count = spec.required_count.unwrap_or(waiting);
        if required_count == 0 || required_count > waiting {
            return Err(CoordinationSpecError::InvalidRequiredCount {
                required: required_count,
                waiting,
            });
        }
        let created_at = Utc::now();
        let deadline = spec
            .timeout
            .and_then(|timeout| chrono::Duration::from_std(timeout).ok())
            .map(|timeout| created_at + timeout);
        Ok(Self {
            id: SyncPointId::new(),
            ticket_id: spec.ticket_id,
            waiting_task_ids,
            required_count,
            timeout: spec.timeout,
            deadline,
            status: SyncPointStatus::Pending,
            created_at,
            satisfied_at: None,
            failure_reason: None,
            timed_out: false,
        })
    }

    pub fn threshold_met(&self, completed: usize) -> bool {
        completed >= self.required_count
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == SyncPointStatus::Pending
            && matches!(self.deadline, Some(deadline) if deadline <= now)
    }

    pub fn watches(&self, task_id: TaskId) -> bool {
        self.waiting_task_ids.contains(&task_id)
    }
}

// ============================================================================
// Joins
// ============================================================================

/// Gate deciding when a join spawns its continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinGate {
    /// Every source must complete; a single failure fails the join.
    All,
    /// The first completion triggers immediately.
    Any,
    /// More than half of the non-failed sources completed. Failed sources
    /// drop out of both numerator and denominator.
    Majority,
}

impl JoinGate {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinGate::All => "all",
            JoinGate::Any => "any",
            JoinGate::Majority => "majority",
        }
    }

    /// Evaluate against a snapshot of source statuses. Blocked sources can
    /// never complete, so they count as failed here.
    pub fn evaluate(&self, sources: &[(TaskId, TaskStatus)]) -> GateDecision {
        let completed: Vec<TaskId> = sources
            .iter()
            .filter(|(_, status)| *status == TaskStatus::Completed)
            .map(|(id, _)| *id)
            .collect();
        let dead: Vec<TaskId> = sources
            .iter()
            .filter(|(_, status)| matches!(status, TaskStatus::Failed | TaskStatus::Blocked))
            .map(|(id, _)| *id)
            .collect();
        let active = sources.len() - completed.len() - dead.len();

        match self {
            JoinGate::All => {
                if let Some(first_dead) = dead.first() {
                    GateDecision::Failed {
                        reason: format!("source task {first_dead} failed under all gate"),
                    }
                } else if completed.len() == sources.len() {
                    GateDecision::Satisfied {
                        satisfied_sources: completed,
                    }
                } else {
                    GateDecision::Pending
                }
            }
            JoinGate::Any => {
                if !completed.is_empty() {
                    GateDecision::Satisfied {
                        satisfied_sources: completed,
                    }
                } else if dead.len() == sources.len() {
                    GateDecision::Failed {
                        reason: "every source task failed under any gate".to_string(),
                    }
                } else {
                    GateDecision::Pending
                }
            }
            JoinGate::Majority => {
                // completed > active is equivalent to completed being a
                // strict majority of the non-failed sources.
                if !completed.is_empty() && completed.len() > active {
                    GateDecision::Satisfied {
                        satisfied_sources: completed,
                    }
                } else if dead.len() == sources.len() {
                    GateDecision::Failed {
                        reason: "every source task failed under majority gate".to_string(),
                    }
                } else {
                    GateDecision::Pending
                }
            }
        }
    }
}

impl std::fmt::Display for JoinGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Pending,
    Satisfied { satisfied_sources: Vec<TaskId> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Pending,
    Satisfied,
    Failed,
}

/// Shape of the continuation task a join spawns. Phase and priority fall
/// back to the first source task's values when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationSpec {
    pub task_type: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

impl ContinuationSpec {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            phase: None,
            priority: None,
            required_capabilities: Vec::new(),
            input: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub source_task_ids: Vec<TaskId>,
    pub gate: JoinGate,
    pub continuation: ContinuationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinContinuation {
    pub id: JoinId,
    pub ticket_id: TicketId,
    pub source_task_ids: Vec<TaskId>,
    pub gate: JoinGate,
    pub continuation: ContinuationSpec,
    pub status: JoinStatus,
    /// Set once the gate fires and the continuation task exists.
    pub continuation_task_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub satisfied_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl JoinContinuation {
    pub fn new(ticket_id: TicketId, spec: JoinSpec) -> Result<Self, CoordinationSpecError> {
        if spec.source_task_ids.is_empty() {
            return Err(CoordinationSpecError::EmptySourceSet);
        }
        Ok(Self {
            id: JoinId::new(),
            ticket_id,
            source_task_ids: spec.source_task_ids,
            gate: spec.gate,
            continuation: spec.continuation,
            status: JoinStatus::Pending,
            continuation_task_id: None,
            created_at: Utc::now(),
            satisfied_at: None,
            failure_reason: None,
        })
    }

    pub fn watches(&self, task_id: TaskId) -> bool {
        self.source_task_ids.contains(&task_id)
    }
}

// ============================================================================
// Merges
// ============================================================================

pub type MergeFn = dyn Fn(&[serde_json::Value]) -> serde_json::Value + Send + Sync;

/// How result payloads are combined. `Custom` owns its function, so a
/// custom merge without a function is unrepresentable.
#[derive(Clone)]
pub enum MergeStrategy {
    Combine,
    Intersection,
    Custom(Arc<MergeFn>),
}

impl std::fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::Combine => write!(f, "Combine"),
            MergeStrategy::Intersection => write!(f, "Intersection"),
            MergeStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("intersection merge requires object payloads (payload {index} is not an object)")]
    NonObjectPayload { index: usize },
}

impl MergeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::Combine => "combine",
            MergeStrategy::Intersection => "intersection",
            MergeStrategy::Custom(_) => "custom",
        }
    }

    /// Combine payloads in the order given. Payload order is the caller's
    /// source order, never completion order, so output is deterministic.
    pub fn apply(&self, payloads: &[serde_json::Value]) -> Result<serde_json::Value, MergeError> {
        match self {
            MergeStrategy::Combine => Ok(combine(payloads)),
            MergeStrategy::Intersection => intersect(payloads),
            MergeStrategy::Custom(merge_fn) => Ok(merge_fn(payloads)),
        }
    }
}

/// Object payloads merge key-wise (later sources win on collision); any
/// non-object payload demotes the whole merge to an ordered array.
fn combine(payloads: &[serde_json::Value]) -> serde_json::Value {
    if payloads.iter().all(|payload| payload.is_object()) {
        let mut merged = serde_json::Map::new();
        for payload in payloads {
            if let serde_json::Value::Object(map) = payload {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        serde_json::Value::Object(merged)
    } else {
        serde_json::Value::Array(payloads.to_vec())
    }
}

/// Keys present in every payload, values taken from the last.
fn intersect(payloads: &[serde_json::Value]) -> Result<serde_json::Value, MergeError> {
    let mut objects = Vec::with_capacity(payloads.len());
    for (index, payload) in payloads.iter().enumerate() {
        match payload {
            serde_json::Value::Object(map) => objects.push(map),
            _ => return Err(MergeError::NonObjectPayload { index }),
        }
    }
    let Some((last, rest)) = objects.split_last() else {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    };
    let mut merged = serde_json::Map::new();
    for (key, value) in last.iter() {
        if rest.iter().all(|map| map.contains_key(key)) {
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(serde_json::Value::Object(merged))
}

/// Output of an immediate merge operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResult {
    pub source_task_ids: Vec<TaskId>,
    pub strategy: String,
    pub output: serde_json::Value,
    pub merged_at: DateTime<Utc>,
}

/// Serializable strategy subset for merges registered ahead of completion
/// (pattern documents cannot carry a function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeKind {
    Combine,
    Intersection,
}

impl MergeKind {
    pub fn to_strategy(self) -> MergeStrategy {
        match self {
            MergeKind::Combine => MergeStrategy::Combine,
            MergeKind::Intersection => MergeStrategy::Intersection,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeKind::Combine => "combine",
            MergeKind::Intersection => "intersection",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Completed,
    Failed,
}

/// A merge registered against sources that have not finished yet. Executed
/// by the engine once every source completes; failed terminally if any
/// source settles without completing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    pub id: MergeId,
    pub ticket_id: Option<TicketId>,
    pub source_task_ids: Vec<TaskId>,
    pub kind: MergeKind,
    pub status: MergeStatus,
    pub output: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
}

impl MergeRecord {
    pub fn new(
        ticket_id: Option<TicketId>,
        source_task_ids: Vec<TaskId>,
        kind: MergeKind,
    ) -> Result<Self, CoordinationSpecError> {
        if source_task_ids.is_empty() {
            return Err(CoordinationSpecError::EmptyMergeSet);
        }
        Ok(Self {
            id: MergeId::new(),
            ticket_id,
            source_task_ids,
            kind,
            status: MergeStatus::Pending,
            output: None,
            failure_reason: None,
            created_at: Utc::now(),
            merged_at: None,
        })
    }

    pub fn watches(&self, task_id: TaskId) -> bool {
        self.source_task_ids.contains(&task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<TaskId> {
        (0..n).map(|_| TaskId::new()).collect()
    }

    // ── Sync points ───────────────────────────────────────────────────────────

    #[test]
    fn test_sync_point_defaults_to_all() {
        let waiting = ids(3);
        let sync = SyncPoint::new(SyncPointSpec::all_of(waiting)).unwrap();
        assert_eq!(sync.required_count, 3);
        assert_eq!(sync.status, SyncPointStatus::Pending);
        assert!(sync.deadline.is_none());
        assert!(!sync.threshold_met(2));
        assert!(sync.threshold_met(3));
    }

    #[test]
    fn test_sync_point_quorum_threshold() {
        let sync = SyncPoint::new(SyncPointSpec::quorum(ids(3), 2)).unwrap();
        assert!(!sync.threshold_met(1));
        assert!(sync.threshold_met(2));
    }

    #[test]
    fn test_sync_point_collapses_duplicate_waiting_ids() {
        let a = TaskId::new();
        let b = TaskId::new();
        let sync = SyncPoint::new(SyncPointSpec::all_of(vec![a, a, b])).unwrap();
        assert_eq!(sync.waiting_task_ids, vec![a, b]);
        // Default threshold is the distinct count, not the listed count.
        assert_eq!(sync.required_count, 2);

        // A twice-listed task cannot carry a two-task quorum alone.
        assert!(matches!(
            SyncPoint::new(SyncPointSpec::quorum(vec![a, a], 2)),
            Err(CoordinationSpecError::InvalidRequiredCount { required: 2, waiting: 1 })
        ));
    }

    #[test]
    fn test_sync_point_rejects_bad_specs() {
        assert!(matches!(
            SyncPoint::new(SyncPointSpec::all_of(vec![])),
            Err(CoordinationSpecError::EmptyWaitingSet)
        ));
        assert!(matches!(
            SyncPoint::new(SyncPointSpec::quorum(ids(2), 3)),
            Err(CoordinationSpecError::InvalidRequiredCount { required: 3, waiting: 2 })
        ));
        assert!(matches!(
            SyncPoint::new(SyncPointSpec::quorum(ids(2), 0)),
            Err(CoordinationSpecError::InvalidRequiredCount { .. })
        ));
    }

    #[test]
    fn test_sync_point_overdue() {
        let mut sync = SyncPoint::new(
            SyncPointSpec::all_of(ids(1)).with_timeout(Duration::from_secs(60)),
        )
        .unwrap();
        let now = Utc::now();
        assert!(!sync.is_overdue(now));
        assert!(sync.is_overdue(now + chrono::Duration::seconds(61)));
        sync.status = SyncPointStatus::Satisfied;
        assert!(!sync.is_overdue(now + chrono::Duration::seconds(61)));
    }

    // ── Join gates ────────────────────────────────────────────────────────────

    fn snapshot(statuses: &[TaskStatus]) -> Vec<(TaskId, TaskStatus)> {
        statuses.iter().map(|s| (TaskId::new(), *s)).collect()
    }

    #[test]
    fn test_all_gate_waits_then_fires() {
        use TaskStatus::*;
        let sources = snapshot(&[Completed, Running, Pending]);
        assert_eq!(JoinGate::All.evaluate(&sources), GateDecision::Pending);

        let sources = snapshot(&[Completed, Completed, Completed]);
        match JoinGate::All.evaluate(&sources) {
            GateDecision::Satisfied { satisfied_sources } => {
                assert_eq!(satisfied_sources.len(), 3)
            }
            other => panic!("expected satisfied, got {other:?}"),
        }
    }

    #[test]
    fn test_all_gate_fails_on_any_source_failure() {
        use TaskStatus::*;
        let sources = snapshot(&[Completed, Failed]);
        assert!(matches!(
            JoinGate::All.evaluate(&sources),
            GateDecision::Failed { .. }
        ));
        // Blocked counts as dead: it can never complete.
        let sources = snapshot(&[Completed, Blocked]);
        assert!(matches!(
            JoinGate::All.evaluate(&sources),
            GateDecision::Failed { .. }
        ));
    }

    #[test]
    fn test_any_gate_fires_on_first_completion() {
        use TaskStatus::*;
        let sources = snapshot(&[Running, Completed, Failed]);
        match JoinGate::Any.evaluate(&sources) {
            GateDecision::Satisfied { satisfied_sources } => {
                assert_eq!(satisfied_sources.len(), 1)
            }
            other => panic!("expected satisfied, got {other:?}"),
        }
        let sources = snapshot(&[Failed, Failed]);
        assert!(matches!(
            JoinGate::Any.evaluate(&sources),
            GateDecision::Failed { .. }
        ));
        let sources = snapshot(&[Running, Failed]);
        assert_eq!(JoinGate::Any.evaluate(&sources), GateDecision::Pending);
    }

    #[test]
    fn test_majority_gate_excludes_failed_from_both_sides() {
        use TaskStatus::*;
        // 3 sources, one failed: majority of the remaining 2 means both.
        let sources = snapshot(&[Completed, Failed, Running]);
        assert_eq!(JoinGate::Majority.evaluate(&sources), GateDecision::Pending);

        let sources = snapshot(&[Completed, Failed, Completed]);
        match JoinGate::Majority.evaluate(&sources) {
            GateDecision::Satisfied { satisfied_sources } => {
                assert_eq!(satisfied_sources.len(), 2)
            }
            other => panic!("expected satisfied, got {other:?}"),
        }

        // Sole survivor completing is a majority of one.
        let sources = snapshot(&[Completed, Failed, Failed]);
        assert!(matches!(
            JoinGate::Majority.evaluate(&sources),
            GateDecision::Satisfied { .. }
        ));

        let sources = snapshot(&[Failed, Failed, Failed]);
        assert!(matches!(
            JoinGate::Majority.evaluate(&sources),
            GateDecision::Failed { .. }
        ));
    }

    #[test]
    fn test_majority_gate_plain_majority() {
        use TaskStatus::*;
        let sources = snapshot(&[Completed, Completed, Running]);
        assert!(matches!(
            JoinGate::Majority.evaluate(&sources),
            GateDecision::Satisfied { .. }
        ));
        let sources = snapshot(&[Completed, Running, Running]);
        assert_eq!(JoinGate::Majority.evaluate(&sources), GateDecision::Pending);
    }

    #[test]
    fn test_join_requires_sources() {
        let spec = JoinSpec {
            source_task_ids: vec![],
            gate: JoinGate::All,
            continuation: ContinuationSpec::new("summarize"),
        };
        assert!(matches!(
            JoinContinuation::new(TicketId::new(), spec),
            Err(CoordinationSpecError::EmptySourceSet)
        ));
    }

    // ── Merges ────────────────────────────────────────────────────────────────

    #[test]
    fn test_combine_merges_objects_in_order() {
        let payloads = vec![
            serde_json::json!({"a": 1, "shared": "first"}),
            serde_json::json!({"b": 2, "shared": "second"}),
        ];
        let output = MergeStrategy::Combine.apply(&payloads).unwrap();
        assert_eq!(
            output,
            serde_json::json!({"a": 1, "b": 2, "shared": "second"})
        );
    }

    #[test]
    fn test_combine_falls_back_to_array_for_non_objects() {
        let payloads = vec![serde_json::json!({"a": 1}), serde_json::json!([1, 2])];
        let output = MergeStrategy::Combine.apply(&payloads).unwrap();
        assert_eq!(output, serde_json::json!([{"a": 1}, [1, 2]]));
    }

    #[test]
    fn test_intersection_keeps_common_keys_from_last() {
        let payloads = vec![
            serde_json::json!({"a": "older", "b": 1}),
            serde_json::json!({"a": "newest", "c": 2}),
        ];
        let output = MergeStrategy::Intersection.apply(&payloads).unwrap();
        assert_eq!(output, serde_json::json!({"a": "newest"}));
    }

    #[test]
    fn test_intersection_resolves_collisions_like_combine() {
        // Both strategies let the latest source win on a shared key.
        let payloads = vec![
            serde_json::json!({"verdict": "first"}),
            serde_json::json!({"verdict": "last"}),
        ];
        let intersected = MergeStrategy::Intersection.apply(&payloads).unwrap();
        let combined = MergeStrategy::Combine.apply(&payloads).unwrap();
        assert_eq!(intersected, serde_json::json!({"verdict": "last"}));
        assert_eq!(intersected["verdict"], combined["verdict"]);
    }

    #[test]
    fn test_intersection_rejects_non_objects() {
        let payloads = vec![serde_json::json!({"a": 1}), serde_json::json!(42)];
        assert!(matches!(
            MergeStrategy::Intersection.apply(&payloads),
            Err(MergeError::NonObjectPayload { index: 1 })
        ));
    }

    #[test]
    fn test_custom_merge_gets_payloads_in_order() {
        let strategy = MergeStrategy::Custom(Arc::new(|payloads: &[serde_json::Value]| {
            serde_json::Value::Array(payloads.iter().rev().cloned().collect())
        }));
        let payloads = vec![serde_json::json!(1), serde_json::json!(2)];
        let output = strategy.apply(&payloads).unwrap();
        assert_eq!(output, serde_json::json!([2, 1]));
        assert_eq!(strategy.name(), "custom");
    }
}
