//! The shared relational write path.
//!
//! Every chunk goes through a stage table: rows are bound as text into
//! `__weir_stage_*`, then cast into the target with one INSERT (replace,
//! append) or UPDATE + INSERT (merge). The stage table is dropped before the
//! chunk returns. All of it runs inside the executor's open transaction.

use crate::dialect::Dialect;
use crate::error::SinkError;
use crate::prepare::prepare_rows;
use crate::sql;
use crate::store::{ChunkWrite, SchemaDiff, TargetStore, TargetTable, WriteMode};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug_span, info, Instrument};
use weir_protocol::{Columns, Engine};

/// Engine connection that runs statements inside a lazily started transaction.
///
/// The first `execute` or `query_column` after construction or after
/// `commit`/`rollback` begins a new transaction.
#[async_trait]
pub trait Executor: Send {
    async fn execute(&mut self, sql: &str, params: &[Option<String>]) -> Result<u64, SinkError>;

    /// First column of every row, NULLs skipped.
    async fn query_column(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<Vec<String>, SinkError>;

    async fn commit(&mut self) -> Result<(), SinkError>;

    async fn rollback(&mut self) -> Result<(), SinkError>;

    /// Roll back anything uncommitted and release the connection.
    async fn close(&mut self) -> Result<(), SinkError>;
}

type Statement = (String, Vec<Option<String>>);

pub struct SqlStore<E> {
    executor: E,
    dialect: Box<dyn Dialect>,
}

impl<E: Executor> SqlStore<E> {
    pub fn new(executor: E, dialect: Box<dyn Dialect>) -> Self {
        Self { executor, dialect }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    async fn exec(&mut self, sql: &str, params: &[Option<String>]) -> Result<u64, SinkError> {
        let span = debug_span!(
            "db.exec",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            params = params.len(),
            duration_ms = tracing::field::Empty
        );
        let start = Instant::now();
        let result = self
            .executor
            .execute(sql, params)
            .instrument(span.clone())
            .await;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        result
    }

    async fn query(&mut self, sql: &str, params: &[Option<String>]) -> Result<Vec<String>, SinkError> {
        let span = debug_span!(
            "db.query",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        );
        let start = Instant::now();
        let result = self
            .executor
            .query_column(sql, params)
            .instrument(span.clone())
            .await;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        result
    }

    async fn live_columns(&mut self, table: &TargetTable) -> Result<Vec<String>, SinkError> {
        let (sql, params) = sql::live_columns_query(self.dialect.as_ref(), table);
        self.query(&sql, &params).await
    }

    fn plan_chunk(&self, chunk: &ChunkWrite<'_>) -> Result<(Vec<Statement>, u64), SinkError> {
        let d = self.dialect.as_ref();
        validate_chunk(chunk)?;

        let mut rows = prepare_rows(chunk.records, chunk.columns, chunk.hash, chunk.clean, d);
        if let WriteMode::Merge { keys } = chunk.mode {
            rows.dedupe_last_by(keys);
        }

        let mut statements: Vec<Statement> = vec![ddl(sql::create_schema(d, chunk.table))];
        match chunk.mode {
            WriteMode::Replace => {
                statements.push(ddl(sql::drop_table_if_exists(&sql::qualified_table(d, chunk.table))));
                statements.push(ddl(sql::create_table(d, chunk.table, chunk.columns, false)));
            }
            WriteMode::Merge { .. } | WriteMode::Append => {
                statements.push(ddl(sql::create_table(d, chunk.table, chunk.columns, true)));
            }
        }

        if rows.is_empty() {
            return Ok((statements, 0));
        }

        let stage = sql::qualified_stage(d, chunk.table, chunk.stage_table);
        statements.push(ddl(sql::drop_table_if_exists(&stage)));
        statements.push(ddl(sql::create_stage(d, chunk.table, chunk.stage_table, chunk.columns)));

        let width = rows.columns.len();
        let mut offset = 0;
        for (insert, n) in sql::stage_inserts(d, chunk.table, chunk.stage_table, &rows.columns, rows.len()) {
            let params = rows.rows[offset..offset + n]
                .iter()
                .flat_map(|row| row.iter().cloned())
                .collect::<Vec<_>>();
            debug_assert_eq!(params.len(), n * width);
            statements.push((insert, params));
            offset += n;
        }

        statements.extend(
            sql::apply_stage(d, chunk.table, chunk.stage_table, chunk.columns, chunk.mode)
                .into_iter()
                .map(ddl),
        );
        statements.push(ddl(sql::drop_table_if_exists(&stage)));

        Ok((statements, rows.len() as u64))
    }
}

fn ddl(sql: String) -> Statement {
    (sql, Vec::new())
}

fn validate_chunk(chunk: &ChunkWrite<'_>) -> Result<(), SinkError> {
    if chunk.columns.is_empty() {
        return Err(SinkError::InvalidInput(format!(
            "No columns to write for table '{}'",
            chunk.table.table
        )));
    }
    if let WriteMode::Merge { keys } = chunk.mode {
        if keys.is_empty() {
            return Err(SinkError::InvalidInput(
                "Merge requires at least one key column".to_string(),
            ));
        }
        if let Some(missing) = keys.iter().find(|k| !chunk.columns.contains(k)) {
            return Err(SinkError::InvalidInput(format!(
                "Merge key '{}' is not a column of '{}'",
                missing, chunk.table.table
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl<E: Executor> TargetStore for SqlStore<E> {
    fn engine(&self) -> Engine {
        self.dialect.engine()
    }

    async fn table_exists(&mut self, table: &TargetTable) -> Result<bool, SinkError> {
        let (sql, params) = sql::table_exists_query(self.dialect.as_ref(), table);
        Ok(!self.query(&sql, &params).await?.is_empty())
    }

    async fn diff_and_evolve_schema(
        &mut self,
        table: &TargetTable,
        desired: &Columns,
        allow_destructive: bool,
    ) -> Result<SchemaDiff, SinkError> {
        let live = self.live_columns(table).await?;
        if live.is_empty() {
            return Ok(SchemaDiff::default());
        }
        let diff = sql::plan_evolution(&live, desired, allow_destructive);
        let statements: Vec<String> = {
            let d = self.dialect.as_ref();
            diff.added
                .iter()
                .map(|c| sql::add_column(d, table, c))
                .chain(diff.removed.iter().map(|c| sql::drop_column(d, table, c)))
                .collect()
        };
        for stmt in &statements {
            self.exec(stmt, &[]).await?;
        }
        if !diff.is_empty() {
            info!(
                table = %table.table,
                schema = %table.qualified_schema(),
                added = diff.added.len(),
                removed = diff.removed.len(),
                "evolved target schema"
            );
        }
        Ok(diff)
    }

    async fn write_chunk(&mut self, chunk: ChunkWrite<'_>) -> Result<u64, SinkError> {
        let (statements, rows) = self.plan_chunk(&chunk)?;
        for (stmt, params) in &statements {
            self.exec(stmt, params).await?;
        }
        Ok(rows)
    }

    async fn create_index_if_missing(
        &mut self,
        name: &str,
        table: &TargetTable,
        column_expr: &str,
    ) -> Result<(), SinkError> {
        let stmt = sql::create_index(self.dialect.as_ref(), name, table, column_expr);
        self.exec(&stmt, &[]).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        self.executor.commit().await
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        self.executor.rollback().await
    }

    async fn close(self: Box<Self>) -> Result<(), SinkError> {
        let mut store = self;
        store.executor.close().await
    }
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit, stable across runs for log correlation.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}
