//! PostgreSQL [`RecordStore`] — the reference multi-process deployment.
//!
//! Every operation is a single statement, so "read committed" plus the
//! primary-key constraint is enough to serialize conflicting writers on one
//! key. Timestamps are stamped with the database's `now()`, never the client
//! clock, so lease starts from different processes are mutually comparable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use rok_schemas::{NewRunRecord, RunRecord, RunStatus};

use crate::{RecordStore, StoreError};

pub const ENV_DB_URL: &str = "ROK_DATABASE_URL";

/// Connectivity + schema presence, for CLI/ops guardrails.
#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub ok: bool,
    pub has_record_table: bool,
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Wrap an existing pool. The caller owns migration timing.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given Postgres URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    /// Connect using `ROK_DATABASE_URL`.
    pub async fn connect_from_env() -> Result<Self> {
        let url =
            std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
        Self::connect(&url).await
    }

    /// Run embedded SQLx migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("record store migrate failed")?;
        Ok(())
    }

    /// Simple status query (connectivity + schema presence).
    pub async fn status(&self) -> Result<StoreStatus> {
        let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
            .fetch_one(&self.pool)
            .await
            .context("status connectivity query failed")?;

        let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
            r#"
            select exists (
                select 1
                from information_schema.tables
                where table_schema='public' and table_name='run_once_record'
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("status table-exists query failed")?;

        Ok(StoreStatus {
            ok: one == 1,
            has_record_table: exists,
        })
    }

    /// Close the pool. Explicit teardown for orderly shutdown; dropping the
    /// store without calling this is safe but may leave connections to time
    /// out server-side.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Detect a Postgres unique violation (SQLSTATE 23505).
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> Result<RunRecord> {
    Ok(RunRecord {
        key: row.try_get("id")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status: RunStatus::from_status_id(row.try_get::<i32, _>("status_id")?)?,
        request: row.try_get("request")?,
        response: row.try_get("response")?,
    })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert(&self, record: NewRunRecord) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            insert into run_once_record (id, started_at, status_id, request)
            values ($1, now(), $2, $3)
            "#,
        )
        .bind(&record.key)
        .bind(RunStatus::Running.status_id())
        .bind(&record.request)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateKey),
            Err(e) => Err(StoreError::Backend(
                anyhow::Error::new(e).context("record insert failed"),
            )),
        }
    }

    async fn load(&self, key: &str) -> Result<Option<RunRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            select id, started_at, finished_at, status_id, request, response
            from run_once_record
            where id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("record load failed")?;

        match row {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    async fn finish(
        &self,
        key: &str,
        response: Option<String>,
        status: RunStatus,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            update run_once_record
               set finished_at = now(),
                   status_id   = $2,
                   response    = $3
             where id = $1
            "#,
        )
        .bind(key)
        .bind(status.status_id())
        .bind(&response)
        .execute(&self.pool)
        .await
        .context("record finish failed")?;

        Ok(res.rows_affected())
    }

    async fn claim(
        &self,
        key: &str,
        expected: RunStatus,
        observed_started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // The started_at fence arbitrates concurrent reclaimers: once one
        // claim lands, the row still reads Running but the lease start has
        // moved, so every claimer holding the old observation affects 0 rows.
        let res = sqlx::query(
            r#"
            update run_once_record
               set status_id   = $4,
                   started_at  = now(),
                   finished_at = null,
                   response    = null
             where id = $1
               and status_id = $2
               and started_at = $3
            "#,
        )
        .bind(key)
        .bind(expected.status_id())
        .bind(observed_started_at)
        .bind(RunStatus::Running.status_id())
        .execute(&self.pool)
        .await
        .context("record claim failed")?;

        Ok(res.rows_affected() == 1)
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            delete from run_once_record
            where finished_at is not null
              and finished_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("record purge failed")?;

        Ok(res.rows_affected())
    }
}
