//! Project repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowforge_core::ResourceId;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub owner: String,
    pub repo_url: String,
    pub branch: String,
    pub credential_id: Option<uuid::Uuid>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn create(
        &self,
        name: &str,
        owner: &str,
        repo_url: &str,
        branch: &str,
        credential_id: Option<ResourceId>,
    ) -> DbResult<ProjectRecord>;
    async fn get_by_id(&self, id: ResourceId) -> DbResult<ProjectRecord>;
    async fn list(&self) -> DbResult<Vec<ProjectRecord>>;
    async fn delete(&self, id: ResourceId) -> DbResult<()>;
}

pub struct PgProjectRepo {
    pool: PgPool,
}

impl PgProjectRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepo for PgProjectRepo {
    async fn create(
        &self,
        name: &str,
        owner: &str,
        repo_url: &str,
        branch: &str,
        credential_id: Option<ResourceId>,
    ) -> DbResult<ProjectRecord> {
        // Invariant (§3): a project without a credential must use a public
        // repository URL (git@/ssh:// requires one).
        if credential_id.is_none() && (repo_url.starts_with("git@") || repo_url.starts_with("ssh://")) {
            return Err(DbError::Invalid("a project with a private repo_url requires a credential".into()));
        }
        let record = sqlx::query_as::<_, ProjectRecord>(
            r#"
            INSERT INTO projects (id, name, owner, repo_url, branch, credential_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(name)
        .bind(owner)
        .bind(repo_url)
        .bind(branch)
        .bind(credential_id.map(|c| *c.as_uuid()))
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<ProjectRecord> {
        sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("project {id}")))
    }

    async fn list(&self) -> DbResult<Vec<ProjectRecord>> {
        Ok(sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects ORDER BY name")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
