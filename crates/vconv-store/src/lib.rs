//! PostgreSQL catalog store.
//!
//! All authoritative coordinator state lives here: videos, tasks, workers
//! and audit logs. Repositories expose pool-level reads plus
//! transaction-level mutations; callers compose multi-row lifecycle
//! changes inside one transaction and rely on row locks
//! (`FOR UPDATE [SKIP LOCKED]`) instead of application-level locking.

mod error;
mod logs;
mod tasks;
mod videos;
mod workers;

pub use error::{StoreError, StoreResult};
pub use logs::LogQuery;
pub use tasks::{NewTask, TaskQuery, TaskSortKey};
pub use videos::{
    CandidateFilter, NewVideo, VideoMetadata, VideoQuery, VideoSortKey, MAX_HW_FPS, MAX_HW_PIXELS,
};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// A catalog transaction. Dropping without commit rolls back.
pub type Tx = sqlx::Transaction<'static, sqlx::Postgres>;

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn from_param(param: &str) -> Option<Self> {
        match param {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// 1-based pagination window.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub const DEFAULT_SIZE: u32 = 20;
    pub const MAX_SIZE: u32 = 200;

    pub fn new(number: Option<u32>, size: Option<u32>) -> Self {
        Self {
            number: number.unwrap_or(1).max(1),
            size: size
                .unwrap_or(Self::DEFAULT_SIZE)
                .clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.number - 1) * i64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Handle to the catalog database.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    /// Connect to PostgreSQL and verify the connection.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "connected to catalog database");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, embedded setups).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("catalog migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction; every multi-row mutation goes through one.
    pub async fn begin(&self) -> StoreResult<Tx> {
        Ok(self.pool.begin().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_defaults_and_clamping() {
        let page = Page::new(None, None);
        assert_eq!(page.number, 1);
        assert_eq!(page.size, Page::DEFAULT_SIZE);
        assert_eq!(page.offset(), 0);

        let page = Page::new(Some(0), Some(10_000));
        assert_eq!(page.number, 1);
        assert_eq!(page.size, Page::MAX_SIZE);

        let page = Page::new(Some(3), Some(50));
        assert_eq!(page.offset(), 100);
        assert_eq!(page.limit(), 50);
    }

    #[test]
    fn test_sort_order_parsing() {
        assert_eq!(SortOrder::from_param("asc"), Some(SortOrder::Asc));
        assert_eq!(SortOrder::from_param("desc"), Some(SortOrder::Desc));
        assert_eq!(SortOrder::from_param("sideways"), None);
    }
}
