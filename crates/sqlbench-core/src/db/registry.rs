use super::sqlite::SqliteConnector;
use super::Connector;
use crate::cache::CacheGateway;
use std::collections::HashMap;
use std::sync::Arc;

/// Adapters keyed by `db_type`.
#[derive(Clone, Default)]
pub struct DatabaseRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter shipped in this crate.
    pub fn with_builtin(cache: Option<CacheGateway>) -> Self {
        let mut r = Self::new();
        r.register("sqlite", Arc::new(SqliteConnector::new(cache)));
        r
    }

    pub fn register(&mut self, db_type: &str, connector: Arc<dyn Connector>) {
        self.connectors.insert(db_type.to_ascii_lowercase(), connector);
    }

    pub fn get(&self, db_type: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&db_type.to_ascii_lowercase()).cloned()
    }
}
