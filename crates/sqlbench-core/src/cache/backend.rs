use moka::sync::Cache;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, payload: &[u8]) -> anyhow::Result<()>;
}

/// Bounded in-process cache.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Arc<Vec<u8>>>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: Cache::new(max_entries),
        }
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.as_ref().clone()))
    }

    fn set(&self, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), Arc::new(payload.to_vec()));
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
  key TEXT PRIMARY KEY,
  payload BLOB NOT NULL,
  created_at TEXT NOT NULL
);
"#;

/// Persistent cache in a single SQLite table; survives across runs.
#[derive(Clone)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("cache connection lock poisoned"))
    }
}

impl CacheBackend for SqliteCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload FROM cache WHERE key=?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    fn set(&self, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cache(key, payload, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                payload=excluded.payload,
                created_at=excluded.created_at",
            params![key, payload, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
