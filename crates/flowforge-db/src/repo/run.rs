//! Run and step-record repository. §3, §4.1, §4.5.
//!
//! All multi-row updates within a run transition (status, end-time,
//! duration, log blob) occur inside a single transaction, so a reader
//! observing a terminal status also observes the matching end-time and
//! log blob (§4.1).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowforge_core::ResourceId;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{clamp_page_size, DbError, DbResult};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunRecord {
    pub id: uuid::Uuid,
    pub pipeline_id: uuid::Uuid,
    pub number: i64,
    pub status: String,
    pub trigger_kind: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub log_blob: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StepRecordRow {
    pub id: uuid::Uuid,
    pub run_id: uuid::Uuid,
    pub stage_name: String,
    pub step_name: String,
    pub index: i32,
    pub status: String,
    pub command: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log_blob: String,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait RunRepo: Send + Sync {
    /// Creates a `pending` run with the next run number for `pipeline_id`,
    /// and one `pending` step record per step in the spec, in order.
    async fn create_run(
        &self,
        pipeline_id: ResourceId,
        trigger_kind: &str,
        actor: &str,
        steps: &[(String, String, String)], // (stage_name, step_name, command)
    ) -> DbResult<(RunRecord, Vec<StepRecordRow>)>;

    async fn get_run(&self, id: ResourceId) -> DbResult<RunRecord>;
    async fn list_runs(&self, pipeline_id: ResourceId, page: i64, page_size: i64) -> DbResult<Vec<RunRecord>>;
    async fn list_steps(&self, run_id: ResourceId) -> DbResult<Vec<StepRecordRow>>;

    /// `pending -> running`.
    async fn mark_run_started(&self, id: ResourceId) -> DbResult<()>;

    /// Atomically writes the run's terminal status, end-time, duration,
    /// and final log blob in one transaction.
    async fn mark_run_terminal(
        &self,
        id: ResourceId,
        status: &str,
        log_blob: &str,
        error_message: Option<&str>,
    ) -> DbResult<()>;

    async fn mark_step_started(&self, id: ResourceId) -> DbResult<()>;
    async fn mark_step_terminal(
        &self,
        id: ResourceId,
        status: &str,
        log_blob: &str,
        error_message: Option<&str>,
    ) -> DbResult<()>;

    /// Clears the stored `log_blob` of every run that finished before
    /// `cutoff`. Run rows themselves are retained; only log text is
    /// reclaimed. Returns the number of runs pruned.
    async fn prune_logs_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}

pub struct PgRunRepo {
    pool: PgPool,
}

impl PgRunRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepo for PgRunRepo {
    async fn create_run(
        &self,
        pipeline_id: ResourceId,
        trigger_kind: &str,
        actor: &str,
        steps: &[(String, String, String)],
    ) -> DbResult<(RunRecord, Vec<StepRecordRow>)> {
        let mut tx = self.pool.begin().await?;

        let run = sqlx::query_as::<_, RunRecord>(
            r#"
            INSERT INTO pipeline_runs (id, pipeline_id, number, status, trigger_kind, actor, created_at, log_blob)
            VALUES ($1, $2, (SELECT COALESCE(MAX(number), 0) + 1 FROM pipeline_runs WHERE pipeline_id = $2), 'pending', $3, $4, NOW(), '')
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(pipeline_id.as_uuid())
        .bind(trigger_kind)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;

        let mut step_records = Vec::with_capacity(steps.len());
        for (index, (stage_name, step_name, command)) in steps.iter().enumerate() {
            let row = sqlx::query_as::<_, StepRecordRow>(
                r#"
                INSERT INTO step_records (id, run_id, stage_name, step_name, index, status, command, log_blob)
                VALUES ($1, $2, $3, $4, $5, 'pending', $6, '')
                RETURNING *
                "#,
            )
            .bind(uuid::Uuid::now_v7())
            .bind(run.id)
            .bind(stage_name)
            .bind(step_name)
            .bind(index as i32)
            .bind(command)
            .fetch_one(&mut *tx)
            .await?;
            step_records.push(row);
        }

        tx.commit().await?;
        Ok((run, step_records))
    }

    async fn get_run(&self, id: ResourceId) -> DbResult<RunRecord> {
        sqlx::query_as::<_, RunRecord>("SELECT * FROM pipeline_runs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("run {id}")))
    }

    async fn list_runs(&self, pipeline_id: ResourceId, page: i64, page_size: i64) -> DbResult<Vec<RunRecord>> {
        let page_size = clamp_page_size(page_size);
        let offset = page.max(0) * page_size;
        Ok(sqlx::query_as::<_, RunRecord>(
            "SELECT * FROM pipeline_runs WHERE pipeline_id = $1 ORDER BY number DESC LIMIT $2 OFFSET $3",
        )
        .bind(pipeline_id.as_uuid())
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_steps(&self, run_id: ResourceId) -> DbResult<Vec<StepRecordRow>> {
        Ok(
            sqlx::query_as::<_, StepRecordRow>("SELECT * FROM step_records WHERE run_id = $1 ORDER BY index")
                .bind(run_id.as_uuid())
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn mark_run_started(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("UPDATE pipeline_runs SET status = 'running', started_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_run_terminal(
        &self,
        id: ResourceId,
        status: &str,
        log_blob: &str,
        error_message: Option<&str>,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $2,
                finished_at = NOW(),
                duration_seconds = EXTRACT(EPOCH FROM (NOW() - COALESCE(started_at, NOW())))::bigint,
                log_blob = $3,
                error_message = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status)
        .bind(log_blob)
        .bind(error_message)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_step_started(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("UPDATE step_records SET status = 'running', started_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_step_terminal(
        &self,
        id: ResourceId,
        status: &str,
        log_blob: &str,
        error_message: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE step_records
            SET status = $2, finished_at = NOW(), log_blob = $3, error_message = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status)
        .bind(log_blob)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_logs_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE pipeline_runs SET log_blob = '' WHERE finished_at < $1 AND log_blob <> ''",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
