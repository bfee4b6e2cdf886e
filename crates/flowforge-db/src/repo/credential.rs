//! Credential (SSH key) repository. §3.
//!
//! Invariant: the private half is written only at creation; every read
//! accessor here returns `CredentialRecord` but callers building a
//! read/list API response should project it through
//! `flowforge_core::credential::CredentialSummary` rather than
//! forwarding `private_key_pem`, the out-of-scope collaborator that
//! owns credential CRUD is responsible for that redaction, same as the
//! authorization boundary in §7.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowforge_core::ResourceId;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CredentialRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub public_key: String,
    pub private_key_pem: String,
    pub default_host: Option<String>,
    pub default_port: Option<i32>,
    pub default_user: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialRepo: Send + Sync {
    async fn create(
        &self,
        name: &str,
        public_key: &str,
        private_key_pem: &str,
        default_host: Option<&str>,
        default_port: Option<i32>,
        default_user: Option<&str>,
    ) -> DbResult<CredentialRecord>;
    async fn get_by_id(&self, id: ResourceId) -> DbResult<CredentialRecord>;
    async fn list(&self) -> DbResult<Vec<CredentialRecord>>;
    async fn delete(&self, id: ResourceId) -> DbResult<()>;
}

pub struct PgCredentialRepo {
    pool: PgPool,
}

impl PgCredentialRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepo for PgCredentialRepo {
    async fn create(
        &self,
        name: &str,
        public_key: &str,
        private_key_pem: &str,
        default_host: Option<&str>,
        default_port: Option<i32>,
        default_user: Option<&str>,
    ) -> DbResult<CredentialRecord> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            r#"
            INSERT INTO credentials (id, name, public_key, private_key_pem, default_host, default_port, default_user, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(name)
        .bind(public_key)
        .bind(private_key_pem)
        .bind(default_host)
        .bind(default_port)
        .bind(default_user)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<CredentialRecord> {
        sqlx::query_as::<_, CredentialRecord>("SELECT * FROM credentials WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("credential {id}")))
    }

    async fn list(&self) -> DbResult<Vec<CredentialRecord>> {
        Ok(sqlx::query_as::<_, CredentialRecord>("SELECT * FROM credentials ORDER BY name")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("DELETE FROM credentials WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
