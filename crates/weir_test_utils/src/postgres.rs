//! Isolated schemas on a real PostgreSQL, for tests that opt in by setting
//! `WEIR_TEST_POSTGRES_URL`.

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

pub const POSTGRES_URL_ENV: &str = "WEIR_TEST_POSTGRES_URL";

/// Connection URL of the test database, if configured.
pub fn test_postgres_url() -> Option<String> {
    std::env::var(POSTGRES_URL_ENV).ok().filter(|url| !url.is_empty())
}

/// A uniquely named schema prefix, dropped by [`PostgresTestGuard::cleanup`].
///
/// Stores write into `<prefix><suffix>`, so the guard drops every schema
/// starting with its prefix.
pub struct PostgresTestGuard {
    pool: PgPool,
    prefix: String,
}

impl PostgresTestGuard {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(2).connect(url).await?;
        let prefix = format!("test_{}", Uuid::new_v4().simple());
        debug!("Using test schema prefix: {}", prefix);
        Ok(Self { pool, prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\".\"{}\"", schema, table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn cleanup(self) -> Result<()> {
        let schemas: Vec<String> = sqlx::query_scalar(
            "SELECT schema_name::text FROM information_schema.schemata WHERE schema_name LIKE $1",
        )
        .bind(format!("{}%", self.prefix))
        .fetch_all(&self.pool)
        .await?;
        for schema in schemas {
            debug!("Dropping test schema: {}", schema);
            sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema))
                .execute(&self.pool)
                .await?;
        }
        self.pool.close().await;
        Ok(())
    }
}
