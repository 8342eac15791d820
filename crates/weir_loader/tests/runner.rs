use serde_json::json;
use weir_loader::{
    DirectTransport, Endpoint, ExtractRequest, InstanceTiming, Job, LoadError, RunContext,
    RunDeps, Runner,
};
use weir_protocol::{Engine, JobId, RunId, Strategy, Value};
use weir_schedule::CancellationToken;
use weir_sinks::TargetTable;
use weir_test_utils::{json_batch, utc, MemoryStore, RecordingTransport, ScriptedSource, StoreCall};

fn table() -> TargetTable {
    TargetTable::new("raw", "orders").with_suffix("_next")
}

fn incremental_job() -> Job {
    Job::builder(
        JobId::new("shop_Intraperiod_Incremental").unwrap(),
        Strategy::Incremental,
        Engine::DuckDb,
        table(),
    )
    .merge_on(vec!["id".into()])
    .index_columns(vec!["created_at".into()])
    .build()
    .unwrap()
}

fn full_refresh_job() -> Job {
    Job::builder(
        JobId::new("shop_Periodic_Full_Refresh").unwrap(),
        Strategy::FullRefresh,
        Engine::DuckDb,
        table(),
    )
    .build()
    .unwrap()
}

fn ctx(hour: u32) -> RunContext {
    RunContext::new(
        RunId::new(),
        InstanceTiming {
            execution_ts: utc(2024, 1, 2, hour),
            next_execution_ts: utc(2024, 1, 2, hour + 1),
            cadence_start: utc(2024, 1, 2, 0),
        },
    )
}

fn three_chunks() -> ScriptedSource {
    ScriptedSource::new()
        .batch(json_batch(json!([{"id": 1, "created_at": "a"}, {"id": 2, "created_at": "b"}])))
        .batch(json_batch(json!([{"id": 3, "created_at": "c"}])))
        .batch(json_batch(json!([{"id": 4, "created_at": "d"}])))
}

#[tokio::test]
async fn failure_on_second_chunk_leaves_store_untouched() {
    let store = MemoryStore::new().fail_on_write(2);
    let seeded = vec![json_batch(json!([{"id": 99}])).into_records().remove(0)];
    store.seed(&table(), &["id"], seeded);
    let before = store.committed();

    let source = three_chunks();
    let transport = RecordingTransport::new();
    let deps = RunDeps {
        source: &source,
        source_endpoint: Endpoint::new("memory://source"),
        source_transport: &transport,
        stores: &store,
        target_endpoint: Endpoint::new("duckdb::memory:"),
        target_transport: &transport,
    };

    let err = Runner::run(&incremental_job(), &ctx(3), &deps, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Write { chunk: 2, .. }));
    assert_eq!(store.committed(), before);
    assert!(!store.has_pending());
    assert!(!store.calls().contains(&StoreCall::Commit));
    assert_eq!(transport.opened(), 2);
    assert_eq!(transport.open_handles(), 0);
}

#[tokio::test]
async fn successful_run_commits_once_after_indexes() {
    let store = MemoryStore::new();
    let source = three_chunks();
    let deps = RunDeps {
        source: &source,
        source_endpoint: Endpoint::new("memory://source"),
        source_transport: &DirectTransport,
        stores: &store,
        target_endpoint: Endpoint::new("duckdb::memory:"),
        target_transport: &DirectTransport,
    };

    let report = Runner::run(&incremental_job(), &ctx(3), &deps, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(report.rows_written, 4);
    assert!(!report.target_existed);
    // first load: window starts at the cadence start
    assert_eq!(report.watermark.from, Some(utc(2024, 1, 2, 0)));
    assert_eq!(report.watermark.until, Some(utc(2024, 1, 2, 4)));

    let calls = store.calls();
    let commits = calls.iter().filter(|c| **c == StoreCall::Commit).count();
    assert_eq!(commits, 1);
    let index_pos = calls.iter().position(|c| matches!(c, StoreCall::CreateIndex(_))).unwrap();
    let commit_pos = calls.iter().position(|c| *c == StoreCall::Commit).unwrap();
    assert!(index_pos < commit_pos);

    let committed = store.committed_table(&table()).unwrap();
    assert_eq!(committed.rows.len(), 4);
    assert_eq!(committed.indexes.len(), 1);
    let first = &committed.rows[0];
    assert_eq!(first.get("_weir_execution_chunk"), Some(&Value::Integer(1)));
    assert_eq!(
        first.get("_weir_job_id"),
        Some(&Value::Text("shop_Intraperiod_Incremental".into()))
    );
    assert_eq!(
        committed.rows[3].get("_weir_execution_chunk"),
        Some(&Value::Integer(3))
    );

    match &source.requests()[0].1 {
        ExtractRequest::Window(w) => assert_eq!(*w, report.watermark),
        other => panic!("unexpected request {other:?}"),
    }
}

#[tokio::test]
async fn index_failure_prevents_commit() {
    let store = MemoryStore::new().fail_index_creation();
    let source = three_chunks();
    let transport = RecordingTransport::new();
    let deps = RunDeps {
        source: &source,
        source_endpoint: Endpoint::new("memory://source"),
        source_transport: &transport,
        stores: &store,
        target_endpoint: Endpoint::new("duckdb::memory:"),
        target_transport: &transport,
    };
    let err = Runner::run(&incremental_job(), &ctx(3), &deps, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::IndexCreation { .. }));
    assert!(store.committed().is_empty());
    assert_eq!(transport.open_handles(), 0);
}

#[tokio::test]
async fn connector_failure_aborts_and_closes_transports() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new()
        .batch(json_batch(json!([{"id": 1}])))
        .fail("source went away");
    let transport = RecordingTransport::new();
    let deps = RunDeps {
        source: &source,
        source_endpoint: Endpoint::new("memory://source"),
        source_transport: &transport,
        stores: &store,
        target_endpoint: Endpoint::new("duckdb::memory:"),
        target_transport: &transport,
    };
    let err = Runner::run(&incremental_job(), &ctx(3), &deps, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Connector(_)));
    assert!(store.committed().is_empty());
    assert_eq!(transport.opened(), 2);
    assert_eq!(transport.closed(), 2);
}

#[tokio::test]
async fn cancelled_before_start_opens_nothing() {
    let store = MemoryStore::new();
    let source = three_chunks();
    let transport = RecordingTransport::new();
    let deps = RunDeps {
        source: &source,
        source_endpoint: Endpoint::new("memory://source"),
        source_transport: &transport,
        stores: &store,
        target_endpoint: Endpoint::new("duckdb::memory:"),
        target_transport: &transport,
    };
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = Runner::run(&incremental_job(), &ctx(3), &deps, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Cancelled));
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn connectors_see_the_transport_endpoint() {
    let store = MemoryStore::new();
    let source = three_chunks();
    let tunnel = RecordingTransport::new().rewriting_to("memory://127.0.0.1:40000");
    let deps = RunDeps {
        source: &source,
        source_endpoint: Endpoint::new("memory://source"),
        source_transport: &tunnel,
        stores: &store,
        target_endpoint: Endpoint::new("duckdb::memory:"),
        target_transport: &DirectTransport,
    };
    Runner::run(&full_refresh_job(), &ctx(0), &deps, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(source.requests()[0].0.url, "memory://127.0.0.1:40000");
}

#[tokio::test]
async fn full_refresh_replaces_then_appends() {
    let store = MemoryStore::new();
    store.seed(&table(), &["id"], Vec::new());
    let source = ScriptedSource::new()
        .batch(json_batch(json!([{"id": 1, "v": 1}])))
        .batch(json_batch(json!([])))
        .batch(json_batch(json!([{"id": 2, "v": "x"}])));
    let deps = RunDeps {
        source: &source,
        source_endpoint: Endpoint::new("memory://source"),
        source_transport: &DirectTransport,
        stores: &store,
        target_endpoint: Endpoint::new("duckdb::memory:"),
        target_transport: &DirectTransport,
    };
    let report = Runner::run(&full_refresh_job(), &ctx(0), &deps, &CancellationToken::new())
        .await
        .unwrap();
    // the empty batch does not consume a chunk number
    assert_eq!(report.chunks, 2);

    let writes: Vec<_> = store
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            StoreCall::Write { mode, .. } => Some(mode),
            _ => None,
        })
        .collect();
    assert_eq!(writes, vec!["replace", "append"]);
    assert_eq!(store.committed_table(&table()).unwrap().rows.len(), 2);
}
