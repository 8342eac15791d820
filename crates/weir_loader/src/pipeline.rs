//! The chunked upsert into a target store.
//!
//! One [`UpsertPipeline`] serves one job of one instance. Chunks are written
//! strictly in order inside the store's open transaction; nothing is
//! committed until [`UpsertPipeline::finish`] has created the requested
//! indexes. Any error leaves the transaction for [`UpsertPipeline::abort`].

use crate::error::LoadError;
use crate::inference::SchemaInferencer;
use crate::job::Job;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use weir_protocol::{
    index_name, stage_table_name, ColumnSpec, Columns, FieldType, JobId, RecordBatch, RunId,
    Strategy, Value, Watermark,
};
use weir_sinks::{ChunkWrite, TargetStore, WriteMode};

pub const COL_EXECUTED_AT: &str = "_weir_executed_at";
pub const COL_EXECUTION_CHUNK: &str = "_weir_execution_chunk";
pub const COL_JOB_ID: &str = "_weir_job_id";
pub const COL_RUN_ID: &str = "_weir_run_id";
pub const COL_EXECUTION_TS: &str = "_weir_execution_ts";
pub const COL_NEXT_EXECUTION_TS: &str = "_weir_next_execution_ts";
pub const COL_LOAD_FROM: &str = "_weir_load_from";
pub const COL_LOAD_UNTIL: &str = "_weir_load_until";

/// Columns stamped onto every record, in table order.
pub fn metadata_columns() -> Columns {
    Columns::new()
        .with(ColumnSpec::new(COL_EXECUTED_AT, FieldType::Timestamp))
        .with(ColumnSpec::new(COL_EXECUTION_CHUNK, FieldType::Integer))
        .with(ColumnSpec::new(COL_JOB_ID, FieldType::Text))
        .with(ColumnSpec::new(COL_RUN_ID, FieldType::Text))
        .with(ColumnSpec::new(COL_EXECUTION_TS, FieldType::Timestamp))
        .with(ColumnSpec::new(COL_NEXT_EXECUTION_TS, FieldType::Timestamp))
        .with(ColumnSpec::new(COL_LOAD_FROM, FieldType::Timestamp))
        .with(ColumnSpec::new(COL_LOAD_UNTIL, FieldType::Timestamp))
}

/// Instance-scoped values written into the metadata columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub executed_at: DateTime<Utc>,
    pub job_id: JobId,
    pub run_id: RunId,
    pub execution_ts: DateTime<Utc>,
    pub next_execution_ts: DateTime<Utc>,
    pub watermark: Watermark,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub chunks: u32,
    pub rows_written: u64,
    pub indexes: Vec<String>,
}

pub struct UpsertPipeline<'a> {
    job: &'a Job,
    store: &'a mut dyn TargetStore,
    meta: RunMetadata,
    stage_table: String,
    chunk: u32,
    rows_written: u64,
}

impl<'a> UpsertPipeline<'a> {
    pub fn new(job: &'a Job, store: &'a mut dyn TargetStore, meta: RunMetadata) -> Self {
        let stage_table = stage_table_name(meta.run_id.as_str(), &job.target().table);
        Self {
            job,
            store,
            meta,
            stage_table,
            chunk: 0,
            rows_written: 0,
        }
    }

    pub fn chunks(&self) -> u32 {
        self.chunk
    }

    /// Write one chunk. `columns` overrides both the job's definition and
    /// inference for this chunk only. An empty batch is skipped without
    /// consuming a chunk number.
    pub async fn submit(&mut self, batch: RecordBatch, columns: Option<&Columns>) -> Result<u64, LoadError> {
        if batch.is_empty() {
            info!(job_id = %self.job.job_id(), "no data to upload");
            return Ok(0);
        }
        self.chunk += 1;
        let chunk = self.chunk;
        info!(job_id = %self.job.job_id(), chunk, rows = batch.len(), "uploading chunk");

        let mut batch = self.stamp(batch);
        let mut columns = self.effective_columns(&mut batch, columns);
        for spec in metadata_columns().iter() {
            columns.insert(spec.clone());
        }

        let keys = self.job.merge_keys();
        for key in keys {
            match columns.get_mut(key) {
                Some(spec) => spec.primary_key = true,
                None => {
                    return Err(LoadError::KeyResolution {
                        key: key.clone(),
                        table: self.job.target().table.clone(),
                    })
                }
            }
        }

        let mode = self.write_mode(chunk);
        let table = self.job.target();
        if mode != WriteMode::Replace
            && self
                .store
                .table_exists(table)
                .await
                .map_err(LoadError::Store)?
        {
            let allow_destructive = self.job.allow_destructive_evolution() && chunk == 1;
            let diff = self
                .store
                .diff_and_evolve_schema(table, &columns, allow_destructive)
                .await
                .map_err(|source| LoadError::Write { chunk, source })?;
            debug!(
                chunk,
                added = ?diff.added.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                removed = ?diff.removed,
                "checked schema changes"
            );
        }

        let written = self
            .store
            .write_chunk(ChunkWrite {
                records: batch.records(),
                columns: &columns,
                table,
                mode: &mode,
                hash: self.job.hash(),
                clean: self.job.clean_data(),
                stage_table: &self.stage_table,
            })
            .await
            .map_err(|source| LoadError::Write { chunk, source })?;

        self.rows_written += written;
        info!(chunk, rows = written, mode = mode.as_str(), "chunk written");
        Ok(written)
    }

    /// Create requested indexes, then commit. On failure the open
    /// transaction is rolled back.
    pub async fn finish(mut self) -> Result<PipelineSummary, LoadError> {
        let indexes = match self.create_indexes().await {
            Ok(indexes) => indexes,
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback().await {
                    warn!("rollback after index failure failed: {}", rollback_err);
                }
                return Err(err);
            }
        };

        info!(job_id = %self.job.job_id(), chunks = self.chunk, rows = self.rows_written, "committing");
        self.store.commit().await.map_err(LoadError::Store)?;

        Ok(PipelineSummary {
            chunks: self.chunk,
            rows_written: self.rows_written,
            indexes,
        })
    }

    async fn create_indexes(&mut self) -> Result<Vec<String>, LoadError> {
        let table = self.job.target();
        let mut indexes = Vec::new();
        if self.chunk == 0 && !self.store.table_exists(table).await.map_err(LoadError::Store)? {
            return Ok(indexes);
        }
        for column in self.job.index_columns() {
            let name = index_name(&table.qualified_schema(), &table.table, column);
            self.store
                .create_index_if_missing(&name, table, column)
                .await
                .map_err(|source| LoadError::IndexCreation {
                    column: column.clone(),
                    source,
                })?;
            indexes.push(name);
        }
        Ok(indexes)
    }

    /// Discard everything written by this pipeline.
    pub async fn abort(self) -> Result<(), LoadError> {
        info!(job_id = %self.job.job_id(), chunks = self.chunk, "rolling back");
        self.store.rollback().await.map_err(LoadError::Store)
    }

    fn write_mode(&self, chunk: u32) -> WriteMode {
        let keys = self.job.merge_keys();
        if self.job.strategy() == Strategy::FullRefresh && chunk == 1 {
            WriteMode::Replace
        } else if keys.is_empty() {
            WriteMode::Append
        } else {
            WriteMode::Merge { keys: keys.to_vec() }
        }
    }

    /// Static job metadata first, then run metadata, which always wins.
    fn stamp(&self, batch: RecordBatch) -> RecordBatch {
        let ts = |t: Option<DateTime<Utc>>| t.map(Value::Timestamp).unwrap_or(Value::Null);
        let run_fields = [
            (COL_EXECUTED_AT, Value::Timestamp(self.meta.executed_at)),
            (COL_EXECUTION_CHUNK, Value::Integer(i64::from(self.chunk))),
            (COL_JOB_ID, Value::Text(self.meta.job_id.to_string())),
            (COL_RUN_ID, Value::Text(self.meta.run_id.to_string())),
            (COL_EXECUTION_TS, Value::Timestamp(self.meta.execution_ts)),
            (COL_NEXT_EXECUTION_TS, Value::Timestamp(self.meta.next_execution_ts)),
            (COL_LOAD_FROM, ts(self.meta.watermark.from)),
            (COL_LOAD_UNTIL, ts(self.meta.watermark.until)),
        ];

        let mut records = batch.into_records();
        for record in &mut records {
            for (name, value) in self.job.metadata() {
                record.insert(name.clone(), value.clone());
            }
            for (name, value) in &run_fields {
                record.insert((*name).to_string(), value.clone());
            }
        }
        RecordBatch::new(records)
    }

    fn effective_columns(&self, batch: &mut RecordBatch, explicit: Option<&Columns>) -> Columns {
        if let Some(columns) = explicit.or(self.job.columns()) {
            return columns.clone();
        }
        debug!("inferring column definition from data");
        let inferencer = SchemaInferencer::new(self.job.exclude_columns(), self.job.hash_columns());
        inferencer.infer(std::slice::from_mut(batch)).columns
    }
}
