// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the coordination pipeline
//!
//! These tests verify the end-to-end path a ticket takes through the engine:
//! 1. Register a pattern template
//! 2. Apply it to a ticket (initial task, fan-out, sync point, join, merge)
//! 3. Drive worker agents through the resulting DAG
//! 4. Verify sync points, the join continuation, and the merge settle

use aegis_coordinator_core::application::{CoordinationEngine, TaskScheduler};
use aegis_coordinator_core::config::CoordinatorConfig;
use aegis_coordinator_core::domain::agent::AgentId;
use aegis_coordinator_core::domain::coordination::{
    ContinuationSpec, JoinGate, JoinSpec, JoinStatus, MergeStatus, SyncPointSpec, SyncPointStatus,
};
use aegis_coordinator_core::domain::events::CoordinationEvent;
use aegis_coordinator_core::domain::task::{NewTask, TaskId, TaskStatus, TicketId};
use aegis_coordinator_core::infrastructure::event_bus::CoordinatorEvent;
use aegis_coordinator_core::runtime::Coordinator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const REVIEW_PATTERN: &str = r#"
apiVersion: 100monkeys.ai/v1
kind: CoordinationPattern
metadata:
  name: fan-out-review
  version: "1.0.0"
spec:
  initial_task:
    name: prepare
    task_type: prepare-${target}
    phase: planning
  fan_out:
    - name: security
      task_type: review
      phase: review
      required_capabilities: [security]
    - name: performance
      task_type: review
      phase: review
      required_capabilities: [performance]
  sync_points:
    - tasks: [security, performance]
      timeout: 5m
  join:
    sources: [security, performance]
    gate: all
    continuation:
      task_type: summarize
      phase: summary
  merge:
    sources: [security, performance]
    strategy: combine
"#;

/// Initialize a test-writer subscriber; `RUST_LOG` overrides the default
/// filter.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aegis_coordinator_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}

fn coordinator() -> Coordinator {
    init_logging();
    Coordinator::in_memory(CoordinatorConfig::default())
}

/// Assign, start, and complete one task as a fresh worker agent.
async fn run_task(scheduler: &Arc<dyn TaskScheduler>, task_id: TaskId, result: serde_json::Value) {
    let agent = AgentId::new();
    scheduler.assign_task(task_id, agent).await.unwrap();
    scheduler.start_task(task_id, agent).await.unwrap();
    scheduler
        .report_completion(task_id, Some(result))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pattern_flow_settles_sync_join_and_merge() {
    let coordinator = coordinator();
    let scheduler = coordinator.scheduler();
    let coordination = coordinator.coordination();
    coordinator
        .pattern_registry()
        .register_yaml(REVIEW_PATTERN)
        .expect("pattern should register");

    let ticket = TicketId::new();
    let mut context = HashMap::new();
    context.insert("target".to_string(), "checkout-service".to_string());
    let applied = coordination
        .apply_pattern(ticket, "fan-out-review", &context)
        .await
        .expect("pattern should apply");

    // Only the initial task is ready; the fan-out waits on it.
    let ready = scheduler.ready_tasks(None, None, None).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].task_type, "prepare-checkout-service");

    run_task(&scheduler, applied.initial_task_id, serde_json::json!({})).await;

    // A security-only worker sees exactly the security shard.
    let caps = vec!["security".to_string()];
    let visible = scheduler
        .ready_tasks(Some("review"), None, Some(&caps))
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, applied.task_ids["security"]);

    run_task(
        &scheduler,
        applied.task_ids["security"],
        serde_json::json!({"findings": ["sql injection in search"]}),
    )
    .await;
    run_task(
        &scheduler,
        applied.task_ids["performance"],
        serde_json::json!({"latency_ms": 120}),
    )
    .await;

    // Settlement hooks drove every coordination entity without any manual
    // re-evaluation.
    let sync_point = coordination
        .get_sync_point(applied.sync_point_ids[0])
        .await
        .unwrap();
    assert_eq!(sync_point.status, SyncPointStatus::Satisfied);

    let join = coordination.get_join(applied.join_id.unwrap()).await.unwrap();
    assert_eq!(join.status, JoinStatus::Satisfied);

    let merge = coordination
        .get_merge(applied.merge_id.unwrap())
        .await
        .unwrap();
    assert_eq!(merge.status, MergeStatus::Completed);
    let output = merge.output.unwrap();
    assert_eq!(
        output["findings"],
        serde_json::json!(["sql injection in search"])
    );
    assert_eq!(output["latency_ms"], serde_json::json!(120));

    // The continuation depends on both shards, both complete, so it is
    // immediately ready.
    let continuation_id = join.continuation_task_id.unwrap();
    let summary_ready = scheduler
        .ready_tasks(Some("summary"), None, None)
        .await
        .unwrap();
    assert_eq!(summary_ready.len(), 1);
    assert_eq!(summary_ready[0].id, continuation_id);

    run_task(&scheduler, continuation_id, serde_json::json!({"verdict": "ship"})).await;

    // Entire ticket settled.
    let tasks = scheduler.ticket_tasks(ticket).await.unwrap();
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|task| task.status == TaskStatus::Completed));
}

#[tokio::test]
async fn test_failed_shard_fails_sync_join_and_merge() {
    let coordinator = coordinator();
    let scheduler = coordinator.scheduler();
    let coordination = coordinator.coordination();
    coordinator
        .pattern_registry()
        .register_yaml(REVIEW_PATTERN)
        .unwrap();

    let ticket = TicketId::new();
    let mut context = HashMap::new();
    context.insert("target".to_string(), "billing".to_string());
    let applied = coordination
        .apply_pattern(ticket, "fan-out-review", &context)
        .await
        .unwrap();

    run_task(&scheduler, applied.initial_task_id, serde_json::json!({})).await;
    run_task(
        &scheduler,
        applied.task_ids["performance"],
        serde_json::json!({"latency_ms": 80}),
    )
    .await;

    // The security shard dies.
    let security = applied.task_ids["security"];
    let agent = AgentId::new();
    scheduler.assign_task(security, agent).await.unwrap();
    scheduler
        .report_failure(security, "agent crashed mid-review")
        .await
        .unwrap();

    // An all-of sync point over two tasks cannot survive one failure.
    let sync_point = coordination
        .get_sync_point(applied.sync_point_ids[0])
        .await
        .unwrap();
    assert_eq!(sync_point.status, SyncPointStatus::Failed);

    // An all gate fails, and the continuation is never spawned.
    let join = coordination.get_join(applied.join_id.unwrap()).await.unwrap();
    assert_eq!(join.status, JoinStatus::Failed);
    assert!(join.continuation_task_id.is_none());

    // The merge fails terminally instead of waiting forever.
    let merge = coordination
        .get_merge(applied.merge_id.unwrap())
        .await
        .unwrap();
    assert_eq!(merge.status, MergeStatus::Failed);
}

#[tokio::test]
async fn test_majority_join_drops_failed_sources_from_both_sides() {
    let coordinator = coordinator();
    let scheduler = coordinator.scheduler();
    let coordination = coordinator.coordination();

    let ticket = TicketId::new();
    let mut sources = Vec::new();
    for n in 0..3 {
        let task = scheduler
            .enqueue_task(NewTask::new(ticket, "vote", format!("voter-{n}")))
            .await
            .unwrap();
        sources.push(task.id);
    }
    let join = coordination
        .register_join(
            ticket,
            JoinSpec {
                source_task_ids: sources.clone(),
                gate: JoinGate::Majority,
                continuation: ContinuationSpec::new("tally"),
            },
        )
        .await
        .unwrap();

    // One voter fails; majority is now judged over the two live sources.
    let agent = AgentId::new();
    scheduler.assign_task(sources[0], agent).await.unwrap();
    scheduler
        .report_failure(sources[0], "voter crashed")
        .await
        .unwrap();
    assert_eq!(
        coordination.get_join(join.id).await.unwrap().status,
        JoinStatus::Pending
    );

    run_task(&scheduler, sources[1], serde_json::json!({"vote": "yes"})).await;
    run_task(&scheduler, sources[2], serde_json::json!({"vote": "yes"})).await;

    let satisfied = coordination.get_join(join.id).await.unwrap();
    assert_eq!(satisfied.status, JoinStatus::Satisfied);

    // The continuation depends only on the sources that completed.
    let continuation = scheduler
        .get_task(satisfied.continuation_task_id.unwrap())
        .await
        .unwrap();
    assert!(!continuation.dependencies.contains(&sources[0]));
    assert!(continuation.dependencies.contains(&sources[1]));
    assert!(continuation.dependencies.contains(&sources[2]));
}

#[tokio::test]
async fn test_awaiters_wake_when_workers_finish() {
    let coordinator = coordinator();
    let scheduler = coordinator.scheduler();
    let coordination = coordinator.coordination();

    let ticket = TicketId::new();
    let a = scheduler
        .enqueue_task(NewTask::new(ticket, "work", "a"))
        .await
        .unwrap();
    let b = scheduler
        .enqueue_task(NewTask::new(ticket, "work", "b"))
        .await
        .unwrap();
    let sync_point = coordination
        .create_sync_point(SyncPointSpec::all_of(vec![a.id, b.id]).for_ticket(ticket))
        .await
        .unwrap();

    let waiter_engine = coordinator.coordination();
    let id = sync_point.id;
    let waiter = tokio::spawn(async move { waiter_engine.await_sync_point(id).await });

    run_task(&scheduler, a.id, serde_json::json!({})).await;
    run_task(&scheduler, b.id, serde_json::json!({})).await;

    let settled = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should wake promptly")
        .unwrap()
        .expect("sync point should satisfy, not time out");
    assert_eq!(settled.status, SyncPointStatus::Satisfied);
}

#[tokio::test]
async fn test_concurrent_completions_satisfy_a_sync_point_exactly_once() {
    let coordinator = coordinator();
    let scheduler = coordinator.scheduler();
    let coordination = coordinator.coordination();

    let ticket = TicketId::new();
    let a = scheduler
        .enqueue_task(NewTask::new(ticket, "work", "a"))
        .await
        .unwrap();
    let b = scheduler
        .enqueue_task(NewTask::new(ticket, "work", "b"))
        .await
        .unwrap();
    coordination
        .create_sync_point(SyncPointSpec::all_of(vec![a.id, b.id]))
        .await
        .unwrap();

    let agent_a = AgentId::new();
    let agent_b = AgentId::new();
    scheduler.assign_task(a.id, agent_a).await.unwrap();
    scheduler.assign_task(b.id, agent_b).await.unwrap();

    let mut receiver = coordinator.event_bus().subscribe();

    // Both settlements race through the hook; the compare-and-swap in the
    // store lets exactly one evaluation publish the satisfaction.
    let (first, second) = tokio::join!(
        scheduler.report_completion(a.id, Some(serde_json::json!({}))),
        scheduler.report_completion(b.id, Some(serde_json::json!({}))),
    );
    first.unwrap();
    second.unwrap();

    let mut satisfied_events = 0;
    while let Ok(event) = receiver.try_recv() {
        if let CoordinatorEvent::Coordination(CoordinationEvent::SyncPointSatisfied { .. }) = event
        {
            satisfied_events += 1;
        }
    }
    assert_eq!(satisfied_events, 1);
}
