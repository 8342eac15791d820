//! Instance execution against the in-memory registry, store and source.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use weir::InstanceExecutor;
use weir_loader::{Endpoint, Job};
use weir_protocol::{Engine, InstanceState, RunId};
use weir_schedule::{
    AlignedSchedule, Cadence, CancellationToken, GateDecision, GatePoller, InstanceQuery,
    MemoryRunRegistry, RunRegistry, ScheduleAligner, TimestampPredicate,
};
use weir_sinks::TargetTable;
use weir_test_utils::{json_batch, utc, MemoryStore, ScriptedSource};

/// Full refresh daily from 2024-01-01, incremental hourly from 2024-01-02.
fn schedule() -> AlignedSchedule {
    ScheduleAligner::new("shop", utc(2024, 1, 1, 0), Duration::days(1), Duration::hours(1))
        .unwrap()
        .align_at(utc(2023, 12, 31, 0))
}

fn jobs(schedule: &AlignedSchedule, cadence: Cadence, tables: &[&str]) -> Vec<Job> {
    let job_id = schedule.cadence(cadence).job_id.clone();
    tables
        .iter()
        .map(|table| {
            Job::builder(
                job_id.clone(),
                cadence.strategy(),
                Engine::DuckDb,
                TargetTable::new("raw", *table).with_suffix("_next"),
            )
            .merge_on(vec!["id".into()])
            .build()
            .unwrap()
        })
        .collect()
}

struct Harness {
    registry: Arc<MemoryRunRegistry>,
    store: MemoryStore,
    executor: InstanceExecutor,
}

fn harness(tables: &[&str], store: MemoryStore) -> Harness {
    let schedule = schedule();
    let registry = Arc::new(MemoryRunRegistry::new());
    let source = ScriptedSource::new().batch(json_batch(json!([
        {"id": 1, "status": "new"},
        {"id": 2, "status": "paid"}
    ])));
    let full_refresh = jobs(&schedule, Cadence::FullRefresh, tables);
    let incremental = jobs(&schedule, Cadence::Incremental, tables);

    let executor = InstanceExecutor::new(
        schedule,
        registry.clone(),
        Arc::new(source),
        Endpoint::new("memory://landing"),
        Arc::new(store.clone()),
        Endpoint::new("duckdb::memory:"),
    )
    .with_jobs(Cadence::FullRefresh, full_refresh)
    .with_jobs(Cadence::Incremental, incremental)
    .with_poller(
        GatePoller::new(std::time::Duration::from_secs(300))
            .with_deadline(std::time::Duration::from_secs(900)),
    );

    Harness {
        registry,
        store,
        executor,
    }
}

async fn state_of(registry: &MemoryRunRegistry, job: Cadence, ts: DateTime<Utc>) -> Option<InstanceState> {
    let job_id = schedule().cadence(job).job_id.clone();
    registry.get(&job_id, ts).await.unwrap().map(|i| i.state)
}

#[tokio::test(start_paused = true)]
async fn incremental_chain_starts_after_full_refresh() {
    let h = harness(&["orders"], MemoryStore::new());
    let cancel = CancellationToken::new();

    // Nothing has succeeded yet: the first incremental instance cannot start.
    let err = h
        .executor
        .execute(Cadence::Incremental, utc(2024, 1, 2, 0), &cancel)
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Gate"));
    assert_eq!(
        state_of(&h.registry, Cadence::Incremental, utc(2024, 1, 2, 0)).await,
        Some(InstanceState::Pending)
    );
    assert!(h.store.committed().is_empty());

    let full = h
        .executor
        .execute(Cadence::FullRefresh, utc(2024, 1, 1, 0), &cancel)
        .await
        .unwrap();
    assert!(full.succeeded());
    assert_eq!(full.reports[0].rows_written, 2);

    let first = h
        .executor
        .execute(Cadence::Incremental, utc(2024, 1, 2, 0), &cancel)
        .await
        .unwrap();
    assert!(first.succeeded());

    // Skipping an hour breaks the chain.
    assert!(h
        .executor
        .execute(Cadence::Incremental, utc(2024, 1, 2, 2), &cancel)
        .await
        .is_err());

    for hour in [1, 2] {
        let outcome = h
            .executor
            .execute(Cadence::Incremental, utc(2024, 1, 2, hour), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.state, InstanceState::Success);
    }
    assert_eq!(
        state_of(&h.registry, Cadence::Incremental, utc(2024, 1, 2, 2)).await,
        Some(InstanceState::Success)
    );
}

#[tokio::test(start_paused = true)]
async fn full_refresh_waits_for_overlapping_incremental() {
    let h = harness(&["orders"], MemoryStore::new());
    let incremental = schedule().incremental.job_id.clone();
    let running = RunId::new();
    h.registry
        .claim_running(&incremental, utc(2024, 1, 2, 0), &running)
        .await
        .unwrap();

    let decision = h
        .executor
        .evaluate_gate(Cadence::FullRefresh, utc(2024, 1, 2, 0))
        .await
        .unwrap();
    assert!(matches!(decision, GateDecision::Unmet(_)));
    assert!(h
        .executor
        .execute(Cadence::FullRefresh, utc(2024, 1, 2, 0), &CancellationToken::new())
        .await
        .is_err());
    assert!(h.store.calls().is_empty());

    h.registry
        .finish(&incremental, utc(2024, 1, 2, 0), &running, InstanceState::Success)
        .await
        .unwrap();
    let decision = h
        .executor
        .evaluate_gate(Cadence::FullRefresh, utc(2024, 1, 2, 0))
        .await
        .unwrap();
    assert!(decision.is_pass());
}

#[tokio::test(start_paused = true)]
async fn earlier_full_refresh_waits_for_running_later_one() {
    let h = harness(&["orders"], MemoryStore::new());
    let full_refresh = schedule().full_refresh.job_id.clone();
    let later = RunId::new();
    h.registry
        .claim_running(&full_refresh, utc(2024, 1, 2, 0), &later)
        .await
        .unwrap();

    let decision = h
        .executor
        .evaluate_gate(Cadence::FullRefresh, utc(2024, 1, 1, 0))
        .await
        .unwrap();
    assert!(matches!(decision, GateDecision::Unmet(_)));
    assert!(h
        .executor
        .execute(Cadence::FullRefresh, utc(2024, 1, 1, 0), &CancellationToken::new())
        .await
        .is_err());

    let running = h
        .registry
        .instances(&InstanceQuery::in_state(
            &full_refresh,
            InstanceState::Running,
            TimestampPredicate::Any,
        ))
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].execution_ts, utc(2024, 1, 2, 0));
    assert!(h.store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_table_fails_the_instance_only() {
    let h = harness(&["customers", "orders"], MemoryStore::new().fail_on_write(1));

    let outcome = h
        .executor
        .execute(Cadence::FullRefresh, utc(2024, 1, 1, 0), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, InstanceState::Failed);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].table, "customers");
    assert_eq!(outcome.reports.len(), 1);

    let committed = h.store.committed();
    assert!(committed.contains_key("raw_next.orders"));
    assert!(!committed.contains_key("raw_next.customers"));
    assert_eq!(
        state_of(&h.registry, Cadence::FullRefresh, utc(2024, 1, 1, 0)).await,
        Some(InstanceState::Failed)
    );

    // A failed predecessor does not satisfy the incremental gate.
    let decision = h
        .executor
        .evaluate_gate(Cadence::Incremental, utc(2024, 1, 2, 0))
        .await
        .unwrap();
    assert!(!decision.is_pass());
}

#[tokio::test]
async fn cancel_before_gate_leaves_instance_pending() {
    let h = harness(&["orders"], MemoryStore::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(h
        .executor
        .execute(Cadence::FullRefresh, utc(2024, 1, 1, 0), &cancel)
        .await
        .is_err());
    assert_eq!(
        state_of(&h.registry, Cadence::FullRefresh, utc(2024, 1, 1, 0)).await,
        Some(InstanceState::Pending)
    );
    assert!(h.store.calls().is_empty());
}

#[tokio::test]
async fn misaligned_timestamp_is_rejected() {
    let h = harness(&["orders"], MemoryStore::new());
    let half_past = utc(2024, 1, 2, 0) + Duration::minutes(30);

    assert!(h
        .executor
        .execute(Cadence::Incremental, half_past, &CancellationToken::new())
        .await
        .is_err());
    assert_eq!(state_of(&h.registry, Cadence::Incremental, half_past).await, None);
}
