//! In-memory target store with a committed snapshot and one pending
//! transaction, plus fault injection.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use weir_protocol::{Columns, Engine, Record, Value};
use weir_sinks::{
    ChunkWrite, SchemaDiff, SinkError, StoreConnector, TargetStore, TargetTable, WriteMode,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    pub indexes: BTreeSet<String>,
}

/// Every call made against the store, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    TableExists(String),
    Evolve {
        table: String,
        added: Vec<String>,
        removed: Vec<String>,
    },
    Write {
        table: String,
        mode: &'static str,
        rows: usize,
    },
    CreateIndex(String),
    Commit,
    Rollback,
    Close,
}

#[derive(Debug, Default)]
struct State {
    committed: BTreeMap<String, MemoryTable>,
    pending: Option<BTreeMap<String, MemoryTable>>,
    calls: Vec<StoreCall>,
    writes: usize,
    fail_on_write: Option<usize>,
    fail_index: bool,
}

impl State {
    fn working(&mut self) -> &mut BTreeMap<String, MemoryTable> {
        let committed = &self.committed;
        self.pending.get_or_insert_with(|| committed.clone())
    }

    fn view(&self) -> &BTreeMap<String, MemoryTable> {
        self.pending.as_ref().unwrap_or(&self.committed)
    }
}

/// Clones share state, so a test can keep one handle while the loader owns
/// (and closes) another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    engine: Engine,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            engine: Engine::DuckDb,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Make the `n`th `write_chunk` call (1-based, counted across runs) fail.
    pub fn fail_on_write(self, n: usize) -> Self {
        self.lock().fail_on_write = Some(n);
        self
    }

    pub fn fail_index_creation(self) -> Self {
        self.lock().fail_index = true;
        self
    }

    /// Put a committed table in place before a run.
    pub fn seed(&self, table: &TargetTable, columns: &[&str], rows: Vec<Record>) {
        self.lock().committed.insert(
            table_key(table),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
                indexes: BTreeSet::new(),
            },
        );
    }

    pub fn committed(&self) -> BTreeMap<String, MemoryTable> {
        self.lock().committed.clone()
    }

    pub fn committed_table(&self, table: &TargetTable) -> Option<MemoryTable> {
        self.lock().committed.get(&table_key(table)).cloned()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the store from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn table_key(table: &TargetTable) -> String {
    match &table.database {
        Some(db) => format!("{}.{}.{}", db, table.qualified_schema(), table.table),
        None => format!("{}.{}", table.qualified_schema(), table.table),
    }
}

fn key_of(record: &Record, keys: &[String]) -> Vec<Option<String>> {
    keys.iter()
        .map(|k| record.get(k).and_then(Value::render_text))
        .collect()
}

fn project(chunk: &ChunkWrite<'_>, record: &Record) -> Record {
    chunk
        .columns
        .iter()
        .map(|spec| {
            let value = record.get(&spec.name).cloned().unwrap_or(Value::Null);
            let hashed = spec.hashed || chunk.hash.is_some_and(|h| h.applies_to(&spec.name));
            let value = match (hashed, value.render_text()) {
                (true, Some(text)) => {
                    let algorithm = chunk.hash.map(|h| h.algorithm).unwrap_or_default();
                    Value::Text(algorithm.digest(text.as_bytes()))
                }
                _ => value,
            };
            (spec.name.clone(), value)
        })
        .collect()
}

fn ensure_columns(table: &mut MemoryTable, columns: &Columns) {
    for name in columns.names() {
        if !table.columns.iter().any(|c| c == name) {
            table.columns.push(name.to_string());
        }
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn table_exists(&mut self, table: &TargetTable) -> Result<bool, SinkError> {
        let key = table_key(table);
        let mut state = self.lock();
        state.calls.push(StoreCall::TableExists(key.clone()));
        Ok(state.view().contains_key(&key))
    }

    async fn diff_and_evolve_schema(
        &mut self,
        table: &TargetTable,
        desired: &Columns,
        allow_destructive: bool,
    ) -> Result<SchemaDiff, SinkError> {
        let key = table_key(table);
        let mut state = self.lock();
        let Some(live) = state.working().get_mut(&key) else {
            return Ok(SchemaDiff::default());
        };

        let added: Vec<_> = desired
            .iter()
            .filter(|c| !live.columns.contains(&c.name))
            .cloned()
            .collect();
        let removed: Vec<String> = if allow_destructive {
            live.columns
                .iter()
                .filter(|c| !desired.contains(c))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        live.columns.extend(added.iter().map(|c| c.name.clone()));
        live.columns.retain(|c| !removed.contains(c));
        for row in &mut live.rows {
            for name in &removed {
                row.remove(name);
            }
        }

        state.calls.push(StoreCall::Evolve {
            table: key,
            added: added.iter().map(|c| c.name.clone()).collect(),
            removed: removed.clone(),
        });
        Ok(SchemaDiff { added, removed })
    }

    async fn write_chunk(&mut self, chunk: ChunkWrite<'_>) -> Result<u64, SinkError> {
        let key = table_key(chunk.table);
        let mut state = self.lock();
        state.writes += 1;
        state.calls.push(StoreCall::Write {
            table: key.clone(),
            mode: chunk.mode.as_str(),
            rows: chunk.records.len(),
        });
        if state.fail_on_write == Some(state.writes) {
            return Err(SinkError::Database(format!(
                "injected failure on write {}",
                state.writes
            )));
        }

        let rows: Vec<Record> = chunk.records.iter().map(|r| project(&chunk, r)).collect();
        let working = state.working();
        match chunk.mode {
            WriteMode::Replace => {
                working.insert(
                    key,
                    MemoryTable {
                        columns: chunk.columns.names().iter().map(|c| c.to_string()).collect(),
                        rows: rows.clone(),
                        indexes: BTreeSet::new(),
                    },
                );
            }
            WriteMode::Append => {
                let table = working.entry(key).or_default();
                ensure_columns(table, chunk.columns);
                table.rows.extend(rows.iter().cloned());
            }
            WriteMode::Merge { keys } => {
                if let Some(missing) = keys.iter().find(|k| !chunk.columns.contains(k)) {
                    return Err(SinkError::InvalidInput(format!(
                        "Merge key '{}' is not a column",
                        missing
                    )));
                }
                let table = working.entry(key).or_default();
                ensure_columns(table, chunk.columns);
                for row in &rows {
                    let row_key = key_of(row, keys);
                    match table.rows.iter_mut().find(|r| key_of(r, keys) == row_key) {
                        Some(existing) => existing.extend(row.clone()),
                        None => table.rows.push(row.clone()),
                    }
                }
            }
        }
        Ok(rows.len() as u64)
    }

    async fn create_index_if_missing(
        &mut self,
        name: &str,
        table: &TargetTable,
        _column_expr: &str,
    ) -> Result<(), SinkError> {
        let key = table_key(table);
        let mut state = self.lock();
        state.calls.push(StoreCall::CreateIndex(name.to_string()));
        if state.fail_index {
            return Err(SinkError::Database(format!("injected index failure for {}", name)));
        }
        match state.working().get_mut(&key) {
            Some(table) => {
                table.indexes.insert(name.to_string());
                Ok(())
            }
            None => Err(SinkError::InvalidInput(format!("No table {}", key))),
        }
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Commit);
        if let Some(pending) = state.pending.take() {
            state.committed = pending;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Rollback);
        state.pending = None;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Close);
        state.pending = None;
        Ok(())
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(&self, _url: &str) -> Result<Box<dyn TargetStore>, SinkError> {
        Ok(Box::new(self.clone()))
    }
}
