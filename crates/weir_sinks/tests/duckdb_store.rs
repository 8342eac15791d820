#![cfg(feature = "duckdb")]

use weir_protocol::{ColumnSpec, Columns, FieldType, Record, Value};
use weir_sinks::{ChunkWrite, DuckDbStore, SinkError, TargetStore, TargetTable, WriteMode};

fn columns() -> Columns {
    Columns::new()
        .with(ColumnSpec::new("id", FieldType::Integer))
        .with(ColumnSpec::new("name", FieldType::Text))
}

fn record(id: i64, name: &str) -> Record {
    let mut r = Record::new();
    r.insert("id".into(), Value::Integer(id));
    r.insert("name".into(), Value::from(name));
    r
}

fn chunk<'a>(
    records: &'a [Record],
    columns: &'a Columns,
    table: &'a TargetTable,
    mode: &'a WriteMode,
) -> ChunkWrite<'a> {
    ChunkWrite {
        records,
        columns,
        table,
        mode,
        hash: None,
        clean: true,
        stage_table: "__weir_stage_test",
    }
}

#[tokio::test]
async fn replace_then_merge_updates_and_inserts() {
    let mut store = DuckDbStore::open_in_memory().unwrap();
    let table = TargetTable::new("raw", "users").with_suffix("_next");
    let cols = columns();

    store
        .write_chunk(chunk(&[record(1, "a"), record(2, "b")], &cols, &table, &WriteMode::Replace))
        .await
        .unwrap();
    let merge = WriteMode::Merge { keys: vec!["id".into()] };
    let written = store
        .write_chunk(chunk(&[record(2, "B"), record(3, "c")], &cols, &table, &merge))
        .await
        .unwrap();
    assert_eq!(written, 2);
    store.commit().await.unwrap();
    assert!(store.table_exists(&table).await.unwrap());
    Box::new(store).close().await.unwrap();
}

#[tokio::test]
async fn rollback_discards_new_table() {
    let mut store = DuckDbStore::open_in_memory().unwrap();
    let table = TargetTable::new("raw", "events");
    let cols = columns();

    store
        .write_chunk(chunk(&[record(1, "a")], &cols, &table, &WriteMode::Append))
        .await
        .unwrap();
    assert!(store.table_exists(&table).await.unwrap());
    store.rollback().await.unwrap();
    assert!(!store.table_exists(&table).await.unwrap());
}

#[tokio::test]
async fn evolution_adds_columns_to_existing_table() {
    let mut store = DuckDbStore::open_in_memory().unwrap();
    let table = TargetTable::new("raw", "users");
    let cols = columns();
    store
        .write_chunk(chunk(&[record(1, "a")], &cols, &table, &WriteMode::Replace))
        .await
        .unwrap();
    store.commit().await.unwrap();

    let wider = cols.clone().with(ColumnSpec::new("email", FieldType::Text));
    let diff = store
        .diff_and_evolve_schema(&table, &wider, false)
        .await
        .unwrap();
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.added[0].name, "email");
    assert!(diff.removed.is_empty());
}

#[tokio::test]
async fn file_database_holds_writer_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("w.duckdb");
    let store = DuckDbStore::open(&path).unwrap();
    let err = DuckDbStore::open(&path).err().unwrap();
    assert!(matches!(err, SinkError::Locked(_)));
    Box::new(store).close().await.unwrap();
    assert!(DuckDbStore::open(&path).is_ok());
}

#[tokio::test]
async fn index_creation_is_idempotent() {
    let mut store = DuckDbStore::open_in_memory().unwrap();
    let table = TargetTable::new("raw", "users");
    let cols = columns();
    store
        .write_chunk(chunk(&[record(1, "a")], &cols, &table, &WriteMode::Replace))
        .await
        .unwrap();
    let name = weir_protocol::index_name("raw", "users", "name");
    store.create_index_if_missing(&name, &table, "name").await.unwrap();
    store.create_index_if_missing(&name, &table, "name").await.unwrap();
    store.commit().await.unwrap();
}
