use crate::config::DbConfig;
use crate::model::Row;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub mod queue;
pub mod registry;
pub mod session;
pub mod sqlite;

pub use queue::{build_handle_queue, HandleLease, HandleQueue};
pub use registry::DatabaseRegistry;
pub use session::{DatabaseSession, TempCredentials};

/// Result of one `execute` call. `None` rows mean the statement did not run
/// (blank query, or the engine gave up under resource exhaustion).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub rows: Option<Vec<Row>>,
    pub eval_rows: Option<Vec<Row>>,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            rows: None,
            eval_rows: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Table name to its columns, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl SchemaMetadata {
    /// One row per column, used as the comparable result of DDL items.
    pub fn to_rows(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        for (table, columns) in &self.tables {
            for c in columns {
                let mut r = Row::new();
                r.insert("table".into(), table.clone().into());
                r.insert("column".into(), c.name.clone().into());
                r.insert("type".into(), c.data_type.clone().into());
                rows.push(r);
            }
        }
        rows
    }

    pub fn to_ddl(&self) -> String {
        self.tables
            .iter()
            .map(|(table, columns)| {
                let cols = columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.data_type).trim_end().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("CREATE TABLE {} ({});", table, cols)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Full rights; used by core handles and temporary DDL databases.
    Owner,
    ReadOnly,
    /// Select, insert, update and delete; no schema changes.
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

/// Everything an adapter needs to open one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub dialect: String,
    pub db_type: String,
    pub database: String,
    pub path: Option<PathBuf>,
    pub host: Option<String>,
    pub credential: Option<Credential>,
    pub privilege: Privilege,
    pub executions_per_minute: Option<u32>,
    pub max_concurrency: usize,
    pub max_attempts: u32,
}

impl ConnectionSpec {
    pub fn from_config(dialect: &str, cfg: &DbConfig, database: &str) -> Self {
        let credential = cfg.user.as_ref().map(|user| Credential {
            user: user.clone(),
            password: cfg.password.clone().unwrap_or_default(),
        });
        Self {
            dialect: dialect.to_string(),
            db_type: cfg.db_type.clone(),
            database: database.to_string(),
            path: cfg.database_path.clone(),
            host: cfg.host.clone(),
            credential,
            privilege: Privilege::Owner,
            executions_per_minute: cfg.max_executions_per_minute,
            max_concurrency: cfg.max_concurrency,
            max_attempts: cfg.max_attempts,
        }
    }

    pub fn for_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    pub fn with_access(&self, credential: Option<Credential>, privilege: Privilege) -> Self {
        Self {
            credential: credential.or_else(|| self.credential.clone()),
            privilege,
            ..self.clone()
        }
    }
}

/// One open database handle of some engine. Implementations must be safe
/// to share between concurrent executions.
#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;
    fn dialect(&self) -> &str;

    /// Query errors are reported in the outcome; `Err` is reserved for the
    /// adapter itself failing.
    async fn execute(
        &self,
        query: &str,
        eval_query: Option<&str>,
        use_cache: bool,
        rollback: bool,
    ) -> anyhow::Result<QueryOutcome>;

    async fn batch_execute(&self, commands: &[String]) -> anyhow::Result<()>;
    async fn get_metadata(&self) -> anyhow::Result<SchemaMetadata>;

    async fn create_temp_database(&self, name: &str) -> anyhow::Result<()>;
    async fn drop_temp_database(&self, name: &str) -> anyhow::Result<()>;
    async fn create_temp_users(
        &self,
        dql_user: &str,
        dml_user: &str,
        password: &str,
    ) -> anyhow::Result<()>;
    async fn delete_temp_user(&self, user: &str) -> anyhow::Result<()>;

    async fn drop_all_tables(&self) -> anyhow::Result<()>;
    /// Table name to CSV rows; the first row names the columns.
    async fn insert_data(&self, data: &BTreeMap<String, Vec<Vec<String>>>) -> anyhow::Result<()>;

    async fn close_connections(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<dyn Database>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_rows_and_ddl() {
        let mut md = SchemaMetadata::default();
        md.tables.insert(
            "orders".into(),
            vec![
                ColumnInfo {
                    name: "id".into(),
                    data_type: "INTEGER".into(),
                },
                ColumnInfo {
                    name: "total".into(),
                    data_type: "REAL".into(),
                },
            ],
        );
        let rows = md.to_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["column"], "total");
        assert_eq!(md.to_ddl(), "CREATE TABLE orders (id INTEGER, total REAL);");
    }

    #[test]
    fn test_with_access_keeps_base_credential_when_none_given() {
        let cfg = DbConfig {
            db_type: "postgres".into(),
            database_path: None,
            host: Some("localhost".into()),
            user: Some("admin".into()),
            password: Some("pw".into()),
            max_executions_per_minute: None,
            max_concurrency: 4,
            max_attempts: 3,
        };
        let base = ConnectionSpec::from_config("postgres", &cfg, "shop");
        let ro = base.with_access(None, Privilege::ReadOnly);
        assert_eq!(ro.credential.as_ref().map(|c| c.user.as_str()), Some("admin"));
        assert_eq!(ro.privilege, Privilege::ReadOnly);

        let tmp = base.with_access(
            Some(Credential {
                user: "tmp_dql".into(),
                password: "x".into(),
            }),
            Privilege::ReadOnly,
        );
        assert_eq!(tmp.credential.unwrap().user, "tmp_dql");
    }
}
