//! Per-workspace MySQL connection pools. A `DashMap` keyed by workspace id gives
//! lock-free reads on the common path (pool already exists) and only takes a per-shard
//! lock to insert a freshly created pool.

use dashmap::DashMap;
use mysql_async::{OptsBuilder, Pool, PoolConstraints, PoolOpts};

use crate::engine::errors::EngineError;

#[derive(Debug, Clone)]
pub struct TenantConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,
}

#[derive(Default)]
pub struct MySqlPoolManager {
    pools: DashMap<String, Pool>,
}

impl MySqlPoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_pool(&self, workspace_id: &str, params: &TenantConnectionParams) -> Result<Pool, EngineError> {
        if let Some(pool) = self.pools.get(workspace_id) {
            return Ok(pool.clone());
        }

        let pool = self.create_pool(params)?;
        self.pools.insert(workspace_id.to_string(), pool.clone());

        tracing::info!(
            "created MySQL connection pool for workspace {} ({}:{})",
            workspace_id,
            params.host,
            params.port
        );

        Ok(pool)
    }

    pub fn remove_pool(&self, workspace_id: &str) {
        if let Some((_, pool)) = self.pools.remove(workspace_id) {
            drop(pool);
            tracing::info!("removed MySQL connection pool for workspace {}", workspace_id);
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn create_pool(&self, params: &TenantConnectionParams) -> Result<Pool, EngineError> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(&params.host)
            .tcp_port(params.port)
            .user(Some(&params.user))
            .pass(params.password.clone())
            .db_name(params.database.clone())
            .tcp_nodelay(true)
            .pool_opts(
                PoolOpts::default()
                    .with_constraints(PoolConstraints::new(1, 10).ok_or_else(|| {
                        EngineError::DependencyUnavailable {
                            dependency: "tenant_db",
                            reason: "invalid pool min/max constraints".to_string(),
                        }
                    })?)
                    .with_inactive_connection_ttl(std::time::Duration::from_secs(300)),
            );

        Ok(Pool::new(opts))
    }
}
