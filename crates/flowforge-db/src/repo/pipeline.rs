//! Pipeline repository. §3.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowforge_core::ResourceId;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PipelineRecord {
    pub id: uuid::Uuid,
    pub project_id: uuid::Uuid,
    pub name: String,
    /// The §6 pipeline spec JSON document.
    pub spec: serde_json::Value,
    pub trigger_kind: String,
    pub cron: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PipelineRepo: Send + Sync {
    async fn create(
        &self,
        project_id: ResourceId,
        name: &str,
        spec: serde_json::Value,
        trigger_kind: &str,
        cron: Option<&str>,
    ) -> DbResult<PipelineRecord>;
    async fn get_by_id(&self, id: ResourceId) -> DbResult<PipelineRecord>;
    async fn list_by_project(&self, project_id: ResourceId) -> DbResult<Vec<PipelineRecord>>;
    /// Every pipeline with `trigger_kind = 'schedule'`, loaded at process
    /// start to seed the Scheduler's job registry (§4.6).
    async fn list_scheduled(&self) -> DbResult<Vec<PipelineRecord>>;
    async fn update_spec(&self, id: ResourceId, spec: serde_json::Value) -> DbResult<PipelineRecord>;
    async fn delete(&self, id: ResourceId) -> DbResult<()>;
}

pub struct PgPipelineRepo {
    pool: PgPool,
}

impl PgPipelineRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineRepo for PgPipelineRepo {
    async fn create(
        &self,
        project_id: ResourceId,
        name: &str,
        spec: serde_json::Value,
        trigger_kind: &str,
        cron: Option<&str>,
    ) -> DbResult<PipelineRecord> {
        if trigger_kind == "schedule" && cron.map(str::trim).unwrap_or("").is_empty() {
            return Err(DbError::Invalid("schedule trigger requires a non-empty cron expression".into()));
        }
        let record = sqlx::query_as::<_, PipelineRecord>(
            r#"
            INSERT INTO pipelines (id, project_id, name, spec, trigger_kind, cron, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(project_id.as_uuid())
        .bind(name)
        .bind(spec)
        .bind(trigger_kind)
        .bind(cron)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<PipelineRecord> {
        sqlx::query_as::<_, PipelineRecord>("SELECT * FROM pipelines WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("pipeline {id}")))
    }

    async fn list_by_project(&self, project_id: ResourceId) -> DbResult<Vec<PipelineRecord>> {
        Ok(sqlx::query_as::<_, PipelineRecord>(
            "SELECT * FROM pipelines WHERE project_id = $1 ORDER BY name",
        )
        .bind(project_id.as_uuid())
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_scheduled(&self) -> DbResult<Vec<PipelineRecord>> {
        Ok(
            sqlx::query_as::<_, PipelineRecord>("SELECT * FROM pipelines WHERE trigger_kind = 'schedule'")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn update_spec(&self, id: ResourceId, spec: serde_json::Value) -> DbResult<PipelineRecord> {
        sqlx::query_as::<_, PipelineRecord>(
            r#"
            UPDATE pipelines SET spec = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(spec)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("pipeline {id}")))
    }

    async fn delete(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("DELETE FROM pipelines WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
