//! DuckDB driver. The connection is synchronous; statements run inline.

use crate::dialect::DuckDbDialect;
use crate::error::SinkError;
use crate::lock::{try_lock_writer, WriterLock};
use crate::sql_store::{Executor, SqlStore};
use async_trait::async_trait;
use duckdb::{params_from_iter, Connection};
use std::path::Path;

pub type DuckDbStore = SqlStore<DuckDbExecutor>;

impl SqlStore<DuckDbExecutor> {
    /// Open (or create) a database file, holding its writer lock.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let lock = try_lock_writer(path)?;
        let conn = Connection::open(path)?;
        Ok(SqlStore::new(
            DuckDbExecutor {
                conn,
                in_tx: false,
                _lock: Some(lock),
            },
            Box::new(DuckDbDialect),
        ))
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        Ok(SqlStore::new(
            DuckDbExecutor {
                conn,
                in_tx: false,
                _lock: None,
            },
            Box::new(DuckDbDialect),
        ))
    }
}

pub struct DuckDbExecutor {
    conn: Connection,
    in_tx: bool,
    _lock: Option<WriterLock>,
}

impl DuckDbExecutor {
    fn begin(&mut self) -> Result<(), SinkError> {
        if !self.in_tx {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
            self.in_tx = true;
        }
        Ok(())
    }

    fn finish(&mut self, statement: &str) -> Result<(), SinkError> {
        if self.in_tx {
            self.in_tx = false;
            self.conn.execute_batch(statement)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for DuckDbExecutor {
    async fn execute(&mut self, sql: &str, params: &[Option<String>]) -> Result<u64, SinkError> {
        self.begin()?;
        let mut stmt = self.conn.prepare(sql)?;
        let changed = stmt.execute(params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    async fn query_column(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<Vec<String>, SinkError> {
        self.begin()?;
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(value) = row.get::<_, Option<String>>(0)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        self.finish("COMMIT")
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        self.finish("ROLLBACK")
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.finish("ROLLBACK")
    }
}
