pub mod backend;
pub mod gateway;
pub mod key;

pub use backend::{CacheBackend, MemoryCache, SqliteCache};
pub use gateway::CacheGateway;

use crate::config::{CacheBackendKind, CacheConfig};
use std::sync::Arc;

/// `None` when caching is disabled.
pub fn build_cache(cfg: &CacheConfig) -> anyhow::Result<Option<CacheGateway>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let backend: Arc<dyn CacheBackend> = match cfg.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new(cfg.max_entries)),
        CacheBackendKind::Sqlite => Arc::new(SqliteCache::open(&cfg.path)?),
    };
    tracing::debug!(event = "cache_ready", backend = ?cfg.backend);
    Ok(Some(CacheGateway::new(backend)))
}
