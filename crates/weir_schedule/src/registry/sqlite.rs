//! SQLite-backed run registry.
//!
//! Claims are a single `UPDATE ... WHERE NOT EXISTS (running row of the job)`
//! inside a transaction, so two processes racing for one job cannot both win.

use super::{InstanceQuery, RegistryError, RunRegistry, TimestampPredicate};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};
use weir_protocol::{InstanceState, JobId, JobInstance, RunId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS weir_job_instances (
    job_id TEXT NOT NULL,
    execution_ts TEXT NOT NULL,
    run_id TEXT,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, execution_ts)
)
"#;

pub struct SqliteRunRegistry {
    pool: Pool<Sqlite>,
}

impl SqliteRunRegistry {
    /// Open (creating if missing) a registry at a `sqlite:` URL.
    pub async fn connect(url: &str) -> Result<Self, RegistryError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        info!("Opened run registry: {}", url);
        Self::from_pool(pool).await
    }

    /// Private in-memory registry. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> Result<Self, RegistryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: Pool<Sqlite>) -> Result<Self, RegistryError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Fixed-width UTC rendering so text order equals time order.
fn ts_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RegistryError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Result<JobInstance, RegistryError> {
    let job_id: String = row.try_get("job_id")?;
    let execution_ts: String = row.try_get("execution_ts")?;
    let run_id: Option<String> = row.try_get("run_id")?;
    let state: String = row.try_get("state")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(JobInstance {
        job_id: JobId::new(job_id).map_err(|e| RegistryError::Corrupt(e.to_string()))?,
        execution_ts: parse_ts(&execution_ts)?,
        run_id: run_id
            .map(|r| RunId::parse(&r))
            .transpose()
            .map_err(|e| RegistryError::Corrupt(e.to_string()))?,
        state: InstanceState::from_str(&state).map_err(RegistryError::Corrupt)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[async_trait]
impl RunRegistry for SqliteRunRegistry {
    async fn instances(&self, query: &InstanceQuery) -> Result<Vec<JobInstance>, RegistryError> {
        let mut sql = String::from(
            "SELECT job_id, execution_ts, run_id, state, updated_at \
             FROM weir_job_instances WHERE job_id = ?",
        );
        if query.state.is_some() {
            sql.push_str(" AND state = ?");
        }
        let bound_ts = match query.execution_ts {
            TimestampPredicate::Any => None,
            TimestampPredicate::Before(ts) => {
                sql.push_str(" AND execution_ts < ?");
                Some(ts_text(ts))
            }
            TimestampPredicate::At(ts) => {
                sql.push_str(" AND execution_ts = ?");
                Some(ts_text(ts))
            }
        };
        sql.push_str(" ORDER BY execution_ts ASC");

        let mut q = sqlx::query(&sql).bind(query.job_id.as_str());
        if let Some(state) = query.state {
            q = q.bind(state.as_str());
        }
        if let Some(ts) = bound_ts {
            q = q.bind(ts);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_instance).collect()
    }

    async fn record_pending(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
    ) -> Result<JobInstance, RegistryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO weir_job_instances (job_id, execution_ts, run_id, state, updated_at)
            VALUES (?, ?, NULL, 'pending', ?)
            "#,
        )
        .bind(job_id.as_str())
        .bind(ts_text(execution_ts))
        .bind(ts_text(Utc::now()))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT job_id, execution_ts, run_id, state, updated_at
            FROM weir_job_instances WHERE job_id = ? AND execution_ts = ?
            "#,
        )
        .bind(job_id.as_str())
        .bind(ts_text(execution_ts))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row_to_instance(&row)
    }

    async fn claim_running(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
        run_id: &RunId,
    ) -> Result<JobInstance, RegistryError> {
        let now = ts_text(Utc::now());
        let key_ts = ts_text(execution_ts);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO weir_job_instances (job_id, execution_ts, run_id, state, updated_at)
            VALUES (?, ?, NULL, 'pending', ?)
            "#,
        )
        .bind(job_id.as_str())
        .bind(&key_ts)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE weir_job_instances
            SET state = 'running', run_id = ?, updated_at = ?
            WHERE job_id = ? AND execution_ts = ?
              AND NOT EXISTS (
                  SELECT 1 FROM weir_job_instances
                  WHERE job_id = ? AND state = 'running'
              )
            "#,
        )
        .bind(run_id.as_str())
        .bind(&now)
        .bind(job_id.as_str())
        .bind(&key_ts)
        .bind(job_id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let running: Option<String> = sqlx::query_scalar(
                r#"
                SELECT execution_ts FROM weir_job_instances
                WHERE job_id = ? AND state = 'running'
                ORDER BY execution_ts ASC LIMIT 1
                "#,
            )
            .bind(job_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;

            let running_ts = match running {
                Some(raw) => parse_ts(&raw)?,
                None => {
                    return Err(RegistryError::Corrupt(format!(
                        "claim of {} @ {} matched no row",
                        job_id, execution_ts
                    )))
                }
            };
            if running_ts == execution_ts {
                return Err(RegistryError::AlreadyRunning {
                    job_id: job_id.clone(),
                    execution_ts,
                });
            }
            return Err(RegistryError::CadenceBusy {
                job_id: job_id.clone(),
                execution_ts,
                running_ts,
            });
        }

        let row = sqlx::query(
            r#"
            SELECT job_id, execution_ts, run_id, state, updated_at
            FROM weir_job_instances WHERE job_id = ? AND execution_ts = ?
            "#,
        )
        .bind(job_id.as_str())
        .bind(&key_ts)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(job_id = %job_id, %execution_ts, run_id = %run_id, "claimed instance");
        row_to_instance(&row)
    }

    async fn finish(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
        run_id: &RunId,
        state: InstanceState,
    ) -> Result<(), RegistryError> {
        if !state.is_terminal() {
            return Err(RegistryError::NonTerminalState(state));
        }
        let rows_affected = sqlx::query(
            r#"
            UPDATE weir_job_instances
            SET state = ?, updated_at = ?
            WHERE job_id = ? AND execution_ts = ? AND run_id = ? AND state = 'running'
            "#,
        )
        .bind(state.as_str())
        .bind(ts_text(Utc::now()))
        .bind(job_id.as_str())
        .bind(ts_text(execution_ts))
        .bind(run_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(RegistryError::NotRunning {
                job_id: job_id.clone(),
                execution_ts,
                run_id: run_id.clone(),
            });
        }
        info!(job_id = %job_id, %execution_ts, state = %state, "instance finished");
        Ok(())
    }
}
