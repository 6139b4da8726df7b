use super::{
    ColumnInfo, ConnectionSpec, Connector, Database, Privilege, QueryOutcome, SchemaMetadata,
};
use crate::cache::key::normalize_query;
use crate::cache::CacheGateway;
use crate::errors::{is_resource_exhausted, ConfigError, ResourceExhausted};
use crate::model::Row;
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, ErrorCode, OpenFlags, Transaction};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteConnector {
    cache: Option<CacheGateway>,
    busy_timeout: Duration,
    backoff_base: Option<Duration>,
}

impl SqliteConnector {
    pub fn new(cache: Option<CacheGateway>) -> Self {
        Self {
            cache,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            backoff_base: None,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = Some(base);
        self
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<dyn Database>> {
        let dir = spec.path.clone().ok_or_else(|| {
            ConfigError(format!(
                "dialect {}: sqlite requires database_path",
                spec.dialect
            ))
        })?;
        std::fs::create_dir_all(&dir)?;

        let mut limiter = RateLimiter::new(
            spec.executions_per_minute,
            spec.max_concurrency,
            spec.max_attempts,
        );
        if let Some(base) = self.backoff_base {
            limiter = limiter.with_backoff_base(base);
        }

        let db = SqliteDatabase {
            name: spec.database.clone(),
            dialect: spec.dialect.clone(),
            file: database_file(&dir, &spec.database),
            dir,
            read_only: spec.privilege == Privilege::ReadOnly,
            busy_timeout: self.busy_timeout,
            limiter,
            cache: self.cache.clone(),
            closed: AtomicBool::new(false),
        };

        // fail fast on unopenable files, e.g. read-only access to a missing db
        db.with_conn(|_| Ok(())).await?;

        tracing::debug!(
            event = "sqlite_connect",
            database = %spec.database,
            read_only = db.read_only
        );
        Ok(Arc::new(db))
    }
}

fn database_file(dir: &Path, name: &str) -> PathBuf {
    if name.ends_with(".db") {
        dir.join(name)
    } else {
        dir.join(format!("{}.db", name))
    }
}

/// SQLite database file. Every call opens its own connection, so one
/// instance can serve concurrent callers.
pub struct SqliteDatabase {
    name: String,
    dialect: String,
    dir: PathBuf,
    file: PathBuf,
    read_only: bool,
    busy_timeout: Duration,
    limiter: RateLimiter,
    cache: Option<CacheGateway>,
    closed: AtomicBool,
}

/// An outcome that must not be stored in the cache.
#[derive(Debug)]
struct Uncacheable(QueryOutcome);

impl std::fmt::Display for Uncacheable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uncacheable query outcome")
    }
}

impl std::error::Error for Uncacheable {}

type Executed = (Vec<Row>, Option<Vec<Row>>);

impl SqliteDatabase {
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("sqlite handle {} is closed", self.name);
        }
        let file = self.file.clone();
        let read_only = self.read_only;
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&file, read_only, busy_timeout)?;
            f(&mut conn)
        })
        .await?
    }

    async fn execute_uncached(
        &self,
        query: &str,
        eval_query: Option<&str>,
        rollback: bool,
    ) -> anyhow::Result<QueryOutcome> {
        let res = self
            .limiter
            .run(|| {
                let q = query.to_string();
                let eq = eval_query.map(str::to_string);
                async move {
                    let res = self
                        .with_conn(move |conn| {
                            Ok(run_in_transaction(conn, &q, eq.as_deref(), rollback))
                        })
                        .await?;
                    classify(res)
                }
            })
            .await;

        match res {
            Ok(Ok((rows, eval_rows))) => Ok(QueryOutcome {
                rows: Some(rows),
                eval_rows,
                error: None,
            }),
            Ok(Err(msg)) => Ok(QueryOutcome::failed(msg)),
            Err(e) if is_resource_exhausted(&e) => {
                tracing::warn!(
                    event = "sqlite_gave_up",
                    database = %self.name,
                    error = %e,
                    "giving up execution; consider lowering max_executions_per_minute"
                );
                Ok(QueryOutcome::default())
            }
            Err(e) => Err(e),
        }
    }
}

/// Transient failures become `ResourceExhausted` so the limiter retries
/// them; anything else is a query error for the caller.
fn classify<T>(res: rusqlite::Result<T>) -> anyhow::Result<Result<T, String>> {
    match res {
        Ok(v) => Ok(Ok(v)),
        Err(e) if is_transient(&e) => Err(ResourceExhausted::new(e.to_string()).into()),
        Err(e) => Ok(Err(e.to_string())),
    }
}

fn is_transient(e: &rusqlite::Error) -> bool {
    if let rusqlite::Error::SqliteFailure(f, _) = e {
        if matches!(
            f.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
        ) {
            return true;
        }
    }
    let msg = e.to_string();
    msg.contains("database is locked") || msg.contains("disk I/O error")
}

fn open(file: &Path, read_only: bool, busy_timeout: Duration) -> anyhow::Result<Connection> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(file, flags)
        .map_err(|e| anyhow::anyhow!("cannot open {}: {}", file.display(), e))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn run_in_transaction(
    conn: &mut Connection,
    query: &str,
    eval_query: Option<&str>,
    rollback: bool,
) -> rusqlite::Result<Executed> {
    let tx = conn.transaction()?;
    let rows = run_statements(&tx, query)?;
    let eval_rows = match eval_query {
        Some(q) => Some(run_statements(&tx, q)?),
        None => None,
    };
    if rollback {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }
    Ok((rows, eval_rows))
}

/// Steps through every statement of `sql` with SQLite's own tokenizer, so
/// trigger bodies and quoted `;` stay intact. Rows from every statement that
/// returns any are concatenated.
fn run_statements(tx: &Transaction<'_>, sql: &str) -> rusqlite::Result<Vec<Row>> {
    let mut out = Vec::new();
    let mut batch = Batch::new(tx, sql);
    while let Some(mut stmt) = batch.next()? {
        if stmt.column_count() == 0 {
            stmt.execute([])?;
            continue;
        }
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            let mut row = Row::new();
            for (i, name) in names.iter().enumerate() {
                row.insert(name.clone(), to_json(r.get_ref(i)?));
            }
            out.push(row);
        }
    }
    Ok(out)
}

fn to_json(v: ValueRef<'_>) -> serde_json::Value {
    match v {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned().into(),
        ValueRef::Blob(b) => hex::encode(b).into(),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl Database for SqliteDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &str {
        &self.dialect
    }

    async fn execute(
        &self,
        query: &str,
        eval_query: Option<&str>,
        use_cache: bool,
        rollback: bool,
    ) -> anyhow::Result<QueryOutcome> {
        if query.trim().is_empty() {
            return Ok(QueryOutcome::default());
        }
        let eval_query = eval_query.filter(|q| !q.trim().is_empty());

        let cache = match (&self.cache, use_cache, eval_query) {
            (Some(c), true, None) => c,
            _ => return self.execute_uncached(query, eval_query, rollback).await,
        };

        let namespace = format!("{}/{}", self.dialect, self.name);
        let normalized = normalize_query(query);
        let res = cache
            .run_cached(&namespace, &[&normalized], || async {
                let outcome = self.execute_uncached(query, None, rollback).await?;
                if outcome.error.is_some() || outcome.rows.is_none() {
                    return Err(Uncacheable(outcome).into());
                }
                Ok(outcome)
            })
            .await;

        match res {
            Ok(o) => Ok(o),
            Err(e) => match e.downcast::<Uncacheable>() {
                Ok(Uncacheable(o)) => Ok(o),
                Err(e) => Err(e),
            },
        }
    }

    async fn batch_execute(&self, commands: &[String]) -> anyhow::Result<()> {
        let commands: Vec<String> = commands
            .iter()
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .collect();
        if commands.is_empty() {
            return Ok(());
        }
        self.limiter
            .run(|| {
                let commands = commands.clone();
                async move {
                    let res = self
                        .with_conn(move |conn| {
                            Ok((|| {
                                let tx = conn.transaction()?;
                                for c in &commands {
                                    tx.execute_batch(c)?;
                                }
                                tx.commit()
                            })())
                        })
                        .await?;
                    classify(res)?
                        .map_err(|e| anyhow::anyhow!("batch execution failed: {}", e))
                }
            })
            .await
    }

    async fn get_metadata(&self) -> anyhow::Result<SchemaMetadata> {
        self.with_conn(|conn| {
            let tables: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' \
                     AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )?;
                let names = stmt.query_map([], |r| r.get::<_, String>(0))?;
                names.collect::<rusqlite::Result<_>>()?
            };
            let mut md = SchemaMetadata::default();
            for table in tables {
                let mut stmt =
                    conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&table)))?;
                let cols = stmt.query_map([], |r| {
                    Ok(ColumnInfo {
                        name: r.get(1)?,
                        data_type: r.get(2)?,
                    })
                })?;
                md.tables
                    .insert(table, cols.collect::<rusqlite::Result<Vec<_>>>()?);
            }
            Ok(md)
        })
        .await
    }

    async fn create_temp_database(&self, name: &str) -> anyhow::Result<()> {
        let file = database_file(&self.dir, name);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
            .map_err(|e| anyhow::anyhow!("could not create database {}: {}", name, e))?;
        Ok(())
    }

    async fn drop_temp_database(&self, name: &str) -> anyhow::Result<()> {
        let file = database_file(&self.dir, name);
        if file.exists() {
            std::fs::remove_file(&file)?;
        }
        Ok(())
    }

    // SQLite has no users; access is enforced by how the file is opened.
    async fn create_temp_users(&self, _dql: &str, _dml: &str, _pw: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_temp_user(&self, _user: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn drop_all_tables(&self) -> anyhow::Result<()> {
        let tables: Vec<String> = self.get_metadata().await?.tables.into_keys().collect();
        let drops: Vec<String> = tables
            .iter()
            .map(|t| format!("DROP TABLE IF EXISTS {}", quote_ident(t)))
            .collect();
        self.batch_execute(&drops).await
    }

    async fn insert_data(&self, data: &BTreeMap<String, Vec<Vec<String>>>) -> anyhow::Result<()> {
        let data = data.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for (table, rows) in &data {
                let Some((header, body)) = rows.split_first() else {
                    continue;
                };
                let cols = header
                    .iter()
                    .map(|c| quote_ident(c.trim()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let params = (1..=header.len())
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_ident(table),
                    cols,
                    params
                );
                let mut stmt = tx.prepare(&sql).map_err(|e| {
                    anyhow::anyhow!("could not insert data into {}: {}", table, e)
                })?;
                for row in body {
                    let values: Vec<Option<&str>> = (0..header.len())
                        .map(|i| row.get(i).map(String::as_str).filter(|v| !v.is_empty()))
                        .collect();
                    stmt.execute(rusqlite::params_from_iter(values))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn close_connections(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn spec(dir: &Path, database: &str, privilege: Privilege) -> ConnectionSpec {
        ConnectionSpec {
            dialect: "sqlite".into(),
            db_type: "sqlite".into(),
            database: database.into(),
            path: Some(dir.to_path_buf()),
            host: None,
            credential: None,
            privilege,
            executions_per_minute: None,
            max_concurrency: 4,
            max_attempts: 2,
        }
    }

    async fn seeded(dir: &Path) -> anyhow::Result<Arc<dyn Database>> {
        let db = SqliteConnector::new(None)
            .connect(&spec(dir, "shop", Privilege::Owner))
            .await?;
        db.batch_execute(&[
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT, total REAL)".into(),
        ])
        .await?;
        let mut data = BTreeMap::new();
        data.insert(
            "orders".to_string(),
            vec![
                vec!["id".into(), "customer".into(), "total".into()],
                vec!["1".into(), "ann".into(), "9.5".into()],
                vec!["2".into(), "bob".into(), "".into()],
                vec!["3".into(), "ann".into(), "4".into()],
            ],
        );
        db.insert_data(&data).await?;
        Ok(db)
    }

    #[tokio::test]
    async fn test_select_preserves_column_order_and_types() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = seeded(dir.path()).await?;

        let out = db
            .execute("SELECT total, id FROM orders ORDER BY id", None, false, true)
            .await?;

        assert_eq!(out.error, None);
        let rows = out.rows.unwrap();
        assert_eq!(rows.len(), 3);
        let cols: Vec<&String> = rows[0].keys().collect();
        assert_eq!(cols, vec!["total", "id"]);
        assert_eq!(rows[0]["total"], serde_json::json!(9.5));
        assert_eq!(rows[1]["total"], serde_json::Value::Null);
        assert_eq!(out.eval_rows, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_dml_rolled_back_after_eval_query() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = seeded(dir.path()).await?;

        let out = db
            .execute(
                "DELETE FROM orders WHERE customer = 'ann'",
                Some("SELECT COUNT(*) AS n FROM orders"),
                false,
                true,
            )
            .await?;
        assert_eq!(out.error, None);
        assert_eq!(out.eval_rows.unwrap()[0]["n"], serde_json::json!(1));

        let after = db
            .execute("SELECT COUNT(*) AS n FROM orders", None, false, true)
            .await?;
        assert_eq!(after.rows.unwrap()[0]["n"], serde_json::json!(3));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_only_handle_reports_write_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let _owner = seeded(dir.path()).await?;
        let ro = SqliteConnector::new(None)
            .connect(&spec(dir.path(), "shop", Privilege::ReadOnly))
            .await?;

        let out = ro.execute("DELETE FROM orders", None, false, true).await?;
        assert!(out.error.unwrap().contains("readonly"));

        let bad = ro.execute("SELECT nope FROM orders", None, false, true).await?;
        assert!(bad.error.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_only_connect_to_missing_db_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let res = SqliteConnector::new(None)
            .connect(&spec(dir.path(), "missing", Privilege::ReadOnly))
            .await;
        assert!(res.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_cached_dql_skips_database_after_first_call() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = CacheGateway::new(Arc::new(MemoryCache::new(16)));
        let db = SqliteConnector::new(Some(cache))
            .connect(&spec(dir.path(), "shop", Privilege::Owner))
            .await?;
        db.batch_execute(&["CREATE TABLE t (a INTEGER)".into(), "INSERT INTO t VALUES (1)".into()])
            .await?;

        let first = db.execute("SELECT a FROM t", None, true, true).await?;
        db.batch_execute(&["INSERT INTO t VALUES (2)".into()]).await?;
        let second = db.execute("SELECT   a\nFROM t", None, true, true).await?;
        let uncached = db.execute("SELECT a FROM t", None, false, true).await?;

        assert_eq!(first, second);
        assert_eq!(uncached.rows.unwrap().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_metadata_and_drop_all_tables() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = seeded(dir.path()).await?;

        let md = db.get_metadata().await?;
        let cols: Vec<&str> = md.tables["orders"].iter().map(|c| c.name.as_str()).collect();
        assert_eq!(cols, vec!["id", "customer", "total"]);

        db.drop_all_tables().await?;
        assert!(db.get_metadata().await?.tables.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_locked_database_degrades_to_empty_outcome() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let _db = seeded(dir.path()).await?;

        let mut s = spec(dir.path(), "shop", Privilege::Owner);
        s.executions_per_minute = Some(6000);
        let db = SqliteConnector::new(None)
            .with_busy_timeout(Duration::from_millis(20))
            .with_backoff_base(Duration::from_millis(5))
            .connect(&s)
            .await?;

        let holder = Connection::open(dir.path().join("shop.db"))?;
        holder.execute_batch("BEGIN EXCLUSIVE")?;

        let out = db.execute("SELECT * FROM orders", None, false, true).await?;
        assert_eq!(out, QueryOutcome::default());

        holder.execute_batch("ROLLBACK")?;
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_calls() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = seeded(dir.path()).await?;
        db.close_connections().await?;
        assert!(db.execute("SELECT 1", None, false, true).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_multi_statement_input_keeps_quotes_and_trigger_bodies() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = seeded(dir.path()).await?;

        let ddl = "CREATE TABLE audit (order_id INTEGER); -- trailing; comment\n\
                   CREATE TRIGGER log_order AFTER INSERT ON orders BEGIN \
                   INSERT INTO audit VALUES (NEW.id); \
                   UPDATE orders SET customer = 'x;y' WHERE id = NEW.id; END; /* ; */";
        let out = db.execute(ddl, None, false, false).await?;
        assert_eq!(out.error, None);

        let out = db
            .execute(
                "INSERT INTO orders (id, customer) VALUES (4, 'cy'); \
                 SELECT o.customer, a.order_id FROM orders o JOIN audit a ON a.order_id = o.id",
                None,
                false,
                true,
            )
            .await?;
        assert_eq!(out.error, None);
        let rows = out.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["customer"], serde_json::json!("x;y"));
        assert_eq!(rows[0]["order_id"], serde_json::json!(4));
        Ok(())
    }
}
