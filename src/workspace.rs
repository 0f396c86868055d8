//! Workspace: the per-tenant bundle of a DB pool, schema context, and caches (spec §5,
//! §9's "implicit session singletons" flag — everything here is owned, not looked up
//! from a global). The schema context sits behind a `tokio::sync::RwLock` so
//! `refresh_schema` can swap it without blocking concurrent readers for long.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};

use crate::db::{MySqlExecutor, SqlExecutor};
use crate::engine::cache::{PaginationCache, QueryCache};
use crate::engine::errors::EngineError;
use crate::engine::schema::SchemaBuilder;
use crate::engine::types::SchemaContext;

/// Tunables that apply per workspace; cloned from `EngineConfig` defaults at
/// construction and never mutated afterward.
#[derive(Debug, Clone)]
pub struct WorkspaceLimits {
    pub llm_concurrency: usize,
    pub db_concurrency: usize,
    pub llm_timeout: Duration,
    pub query_timeout: Duration,
    pub pagination_ttl: Duration,
}

impl Default for WorkspaceLimits {
    fn default() -> Self {
        Self {
            llm_concurrency: 4,
            db_concurrency: 10,
            llm_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(15),
            pagination_ttl: Duration::from_secs(3600),
        }
    }
}

pub struct Workspace {
    pub id: String,
    pub executor: Arc<dyn SqlExecutor>,
    pub schema: RwLock<Option<SchemaContext>>,
    pub query_cache: QueryCache,
    pub pagination_cache: PaginationCache,
    pub llm_permits: Semaphore,
    pub db_permits: Semaphore,
    pub limits: WorkspaceLimits,
}

impl Workspace {
    pub fn new(id: impl Into<String>, pool: mysql_async::Pool, limits: WorkspaceLimits) -> Self {
        Self::with_executor(id, Arc::new(MySqlExecutor::new(pool)), limits)
    }

    /// Builds a workspace around any `SqlExecutor`, not just a live MySQL pool — the
    /// hook tests use to drive the pipeline against a scripted fake (spec §8's test
    /// tooling requirement).
    pub fn with_executor(id: impl Into<String>, executor: Arc<dyn SqlExecutor>, limits: WorkspaceLimits) -> Self {
        Self {
            id: id.into(),
            executor,
            schema: RwLock::new(None),
            query_cache: QueryCache::new(),
            pagination_cache: PaginationCache::new(limits.pagination_ttl),
            llm_permits: Semaphore::new(limits.llm_concurrency),
            db_permits: Semaphore::new(limits.db_concurrency),
            limits,
        }
    }

    /// Builds the schema context if absent, or returns the cached one. Called lazily by
    /// the pipeline rather than eagerly at workspace construction (§4.1: "built once per
    /// workspace activation").
    pub async fn ensure_schema(&self) -> Result<SchemaContext, EngineError> {
        if let Some(ctx) = self.schema.read().await.clone() {
            return Ok(ctx);
        }

        let built = SchemaBuilder::new(self.executor.as_ref()).build().await?;
        *self.schema.write().await = Some(built.clone());
        Ok(built)
    }

    /// Rebuilds the whole schema context, invalidating the query cache (a schema change
    /// can change what a previously cached `Answer` means) per §4.1's refresh contract.
    pub async fn refresh_schema(&self) -> Result<(), EngineError> {
        let built = SchemaBuilder::new(self.executor.as_ref()).build().await?;
        *self.schema.write().await = Some(built);
        self.query_cache.invalidate_all();
        Ok(())
    }
}
