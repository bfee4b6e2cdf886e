//! Persistence Gateway for the FlowForge CI/CD control plane. §4.1.
//!
//! Typed Postgres accessors for projects, credentials, pipelines, runs,
//! and step records. Run-transition writes (status, end-time, duration,
//! log blob) happen inside a single transaction so a reader observing a
//! terminal status also observes the matching end-time and log blob.

pub mod error;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::*;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Clamp a requested page size into `[1, 100]`. §4.1.
pub fn clamp_page_size(requested: i64) -> i64 {
    requested.clamp(1, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped_to_one_hundred() {
        assert_eq!(clamp_page_size(500), 100);
        assert_eq!(clamp_page_size(0), 1);
        assert_eq!(clamp_page_size(-5), 1);
        assert_eq!(clamp_page_size(42), 42);
    }
}
