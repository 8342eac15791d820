//! PostgreSQL driver over a sqlx pool.

use crate::dialect::PostgresDialect;
use crate::error::SinkError;
use crate::sql_store::{Executor, SqlStore};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

pub type PostgresStore = SqlStore<PgExecutor>;

impl SqlStore<PgExecutor> {
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new().max_connections(2).connect(url).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        SqlStore::new(PgExecutor { pool, tx: None }, Box::new(PostgresDialect))
    }
}

pub struct PgExecutor {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgExecutor {
    async fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, SinkError> {
        if self.tx.is_none() {
            debug!("beginning postgres transaction");
            self.tx = Some(self.pool.begin().await?);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| SinkError::Database("transaction not started".to_string()))
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn execute(&mut self, sql: &str, params: &[Option<String>]) -> Result<u64, SinkError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(param.as_deref());
        }
        let tx = self.tx().await?;
        let result = query.execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn query_column(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<Vec<String>, SinkError> {
        let mut query = sqlx::query_scalar::<_, Option<String>>(sql);
        for param in params {
            query = query.bind(param.as_deref());
        }
        let tx = self.tx().await?;
        let values = query.fetch_all(&mut **tx).await?;
        Ok(values.into_iter().flatten().collect())
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.rollback().await?;
        self.pool.close().await;
        Ok(())
    }
}
