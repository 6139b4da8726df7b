#![allow(dead_code)]

use async_trait::async_trait;
use sqlbench_core::db::{ConnectionSpec, Connector, Database, QueryOutcome, SchemaMetadata};
use sqlbench_core::metrics_api::{Comparator, ComparatorOutput, Comparison};
use sqlbench_core::model::{EvalCase, Row};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Counters shared by every handle a [`FakeConnector`] hands out.
#[derive(Default)]
pub struct FakeStats {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub executes: AtomicUsize,
    pub temp_dbs_created: AtomicUsize,
    pub temp_dbs_dropped: AtomicUsize,
    pub temp_users_created: AtomicUsize,
    pub temp_users_dropped: AtomicUsize,
    pub connected: Mutex<Vec<String>>,
}

impl FakeStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Canned query engine: answers known queries with fixed rows and fails
/// everything else the way a real engine reports a bad relation.
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub stats: Arc<FakeStats>,
    pub answers: Arc<HashMap<String, Vec<Row>>>,
    /// Setup scripts fail on these databases.
    pub broken_setup: Arc<Vec<String>>,
    /// Connecting to these databases fails.
    pub unreachable: Arc<Vec<String>>,
    /// Schema reads fail on these databases.
    pub broken_metadata: Arc<Vec<String>>,
    /// Executing these queries returns an error instead of an outcome.
    pub crashing_queries: Arc<Vec<String>>,
}

impl FakeConnector {
    pub fn with_answers(answers: &[(&str, serde_json::Value)]) -> Self {
        let answers = answers
            .iter()
            .map(|(q, v)| (q.to_string(), rows(v.clone())))
            .collect();
        Self {
            answers: Arc::new(answers),
            ..Default::default()
        }
    }
}

pub fn rows(v: serde_json::Value) -> Vec<Row> {
    serde_json::from_value(v).expect("rows must be an array of objects")
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<dyn Database>> {
        if self.unreachable.contains(&spec.database) {
            anyhow::bail!("connection refused for {}", spec.database);
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        self.stats
            .connected
            .lock()
            .unwrap()
            .push(spec.database.clone());
        Ok(Arc::new(FakeDatabase {
            name: spec.database.clone(),
            dialect: spec.dialect.clone(),
            connector: self.clone(),
        }))
    }
}

pub struct FakeDatabase {
    name: String,
    dialect: String,
    connector: FakeConnector,
}

#[async_trait]
impl Database for FakeDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &str {
        &self.dialect
    }

    async fn execute(
        &self,
        query: &str,
        _eval_query: Option<&str>,
        _use_cache: bool,
        _rollback: bool,
    ) -> anyhow::Result<QueryOutcome> {
        self.connector.stats.executes.fetch_add(1, Ordering::SeqCst);
        if self.connector.crashing_queries.iter().any(|q| q == query.trim()) {
            anyhow::bail!("server closed the connection unexpectedly");
        }
        Ok(match self.connector.answers.get(query.trim()) {
            Some(rows) => QueryOutcome {
                rows: Some(rows.clone()),
                ..Default::default()
            },
            None => QueryOutcome::failed(format!("relation does not exist: {}", query)),
        })
    }

    async fn batch_execute(&self, _commands: &[String]) -> anyhow::Result<()> {
        if self.connector.broken_setup.contains(&self.name) {
            anyhow::bail!("permission denied for schema public");
        }
        Ok(())
    }

    async fn get_metadata(&self) -> anyhow::Result<SchemaMetadata> {
        if self.connector.broken_metadata.contains(&self.name) {
            anyhow::bail!("permission denied for information_schema");
        }
        Ok(SchemaMetadata::default())
    }

    async fn create_temp_database(&self, _name: &str) -> anyhow::Result<()> {
        self.connector
            .stats
            .temp_dbs_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_temp_database(&self, _name: &str) -> anyhow::Result<()> {
        self.connector
            .stats
            .temp_dbs_dropped
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_temp_users(&self, _dql: &str, _dml: &str, _pw: &str) -> anyhow::Result<()> {
        self.connector
            .stats
            .temp_users_created
            .fetch_add(2, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_temp_user(&self, _user: &str) -> anyhow::Result<()> {
        self.connector
            .stats
            .temp_users_dropped
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_all_tables(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn insert_data(&self, _data: &BTreeMap<String, Vec<Vec<String>>>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close_connections(&self) -> anyhow::Result<()> {
        self.connector.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 100 when both sides returned identical rows.
pub struct SameRows;

#[async_trait]
impl Comparator for SameRows {
    fn name(&self) -> &'static str {
        "same_rows"
    }

    async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
        if c.has_error() {
            return Ok(ComparatorOutput::score(0.0));
        }
        let same = c.golden_rows == c.generated_rows;
        Ok(ComparatorOutput::score(if same { 100.0 } else { 0.0 }))
    }
}

/// Always fails.
pub struct Exploding;

#[async_trait]
impl Comparator for Exploding {
    fn name(&self) -> &'static str {
        "exploding"
    }

    async fn compare(&self, _c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
        anyhow::bail!("scorer crashed")
    }
}

pub fn case(
    id: &str,
    query_type: &str,
    database: &str,
    dialect: &str,
    golden: &str,
    generated: &str,
) -> EvalCase {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "query_type": query_type,
        "database": database,
        "dialects": [dialect],
        "nl_prompt": format!("question {}", id),
        "golden_sql": { dialect: [golden] },
        "generated_sql": generated,
    }))
    .expect("valid case")
}
