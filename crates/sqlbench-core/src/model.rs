use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One result row: column name to value, in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Dql,
    Dml,
    Ddl,
}

impl QueryType {
    /// Processing order inside one database.
    pub const ALL: [QueryType; 3] = [QueryType::Dql, QueryType::Dml, QueryType::Ddl];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dql" => Some(QueryType::Dql),
            "dml" => Some(QueryType::Dml),
            "ddl" => Some(QueryType::Ddl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Dql => "dql",
            QueryType::Dml => "dml",
            QueryType::Ddl => "ddl",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub dialect: String,
    pub database: String,
    pub query_type: QueryType,
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dialect, self.database, self.query_type)
    }
}

/// One benchmark item as loaded from the dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalCase {
    pub id: String,
    #[serde(deserialize_with = "de_query_type")]
    pub query_type: QueryType,
    pub database: String,
    pub dialects: Vec<String>,
    pub nl_prompt: String,
    /// Per-dialect golden queries; the first entry is the one executed.
    pub golden_sql: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub eval_query: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub setup_sql: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cleanup_sql: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub other: BTreeMap<String, serde_json::Value>,
    /// Precomputed output replayed by the pass-through model generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_generator_error: Option<String>,
}

fn de_query_type<'de, D>(d: D) -> Result<QueryType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(d)?;
    QueryType::parse(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown query_type '{}'", raw)))
}

impl EvalCase {
    /// Copy of this case restricted to a single dialect. Never mutates `self`.
    pub fn for_dialect(&self, dialect: &str) -> EvalCase {
        let only = |m: &BTreeMap<String, Vec<String>>| -> BTreeMap<String, Vec<String>> {
            m.get(dialect)
                .map(|v| BTreeMap::from([(dialect.to_string(), v.clone())]))
                .unwrap_or_default()
        };
        EvalCase {
            dialects: vec![dialect.to_string()],
            golden_sql: only(&self.golden_sql),
            eval_query: only(&self.eval_query),
            setup_sql: only(&self.setup_sql),
            cleanup_sql: only(&self.cleanup_sql),
            ..self.clone()
        }
    }

    fn first_for(m: &BTreeMap<String, Vec<String>>, dialect: &str) -> Option<String> {
        m.get(dialect)
            .and_then(|v| v.first())
            .filter(|s| !s.trim().is_empty())
            .cloned()
    }

    pub fn golden_sql_for(&self, dialect: &str) -> String {
        Self::first_for(&self.golden_sql, dialect).unwrap_or_default()
    }

    pub fn eval_query_for(&self, dialect: &str) -> Option<String> {
        Self::first_for(&self.eval_query, dialect)
    }
}

/// Accumulator for one dialect-specialised case as it moves through the
/// pipeline. Each stage owns it exclusively while running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    #[serde(flatten)]
    pub case: EvalCase,
    pub job_id: String,
    pub run_time: DateTime<Utc>,
    pub dialect: String,

    pub generated_prompt: Option<String>,
    pub prompt_generator_error: Option<String>,

    #[serde(rename = "generated_sql_output")]
    pub generated_sql: Option<String>,
    pub sanitized_sql: Option<String>,
    #[serde(rename = "sql_generator_error_output")]
    pub sql_generator_error: Option<String>,
    pub sql_generator_time_ms: Option<u64>,

    pub generated_result: Option<Vec<Row>>,
    pub eval_results: Option<Vec<Row>>,
    pub generated_error: Option<String>,
    pub golden_result: Option<Vec<Row>>,
    pub golden_eval_results: Option<Vec<Row>>,
    pub golden_error: Option<String>,

    #[serde(default)]
    pub truncated_rows: usize,
}

impl EvalResult {
    pub fn new(case: EvalCase, dialect: &str, job_id: &str, run_time: DateTime<Utc>) -> Self {
        Self {
            case,
            job_id: job_id.to_string(),
            run_time,
            dialect: dialect.to_string(),
            generated_prompt: None,
            prompt_generator_error: None,
            generated_sql: None,
            sanitized_sql: None,
            sql_generator_error: None,
            sql_generator_time_ms: None,
            generated_result: None,
            eval_results: None,
            generated_error: None,
            golden_result: None,
            golden_eval_results: None,
            golden_error: None,
            truncated_rows: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.case.id
    }

    pub fn query_type(&self) -> QueryType {
        self.case.query_type
    }

    pub fn golden_sql(&self) -> String {
        self.case.golden_sql_for(&self.dialect)
    }

    pub fn eval_query(&self) -> Option<String> {
        self.case.eval_query_for(&self.dialect)
    }

    /// True when SQL generation produced something the exec stage can run.
    pub fn has_sql_to_execute(&self) -> bool {
        self.sql_generator_error.is_none()
            && self
                .generated_sql
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty())
    }

    /// Caps every row list at `limit` rows; the number of dropped rows is
    /// accumulated in `truncated_rows`.
    pub fn truncate_outputs(&mut self, limit: usize) {
        let mut dropped = 0;
        for rows in [
            &mut self.generated_result,
            &mut self.eval_results,
            &mut self.golden_result,
            &mut self.golden_eval_results,
        ]
        .into_iter()
        .flatten()
        {
            if rows.len() > limit {
                dropped += rows.len() - limit;
                rows.truncate(limit);
            }
        }
        self.truncated_rows += dropped;
    }
}

/// One comparator applied to one [`EvalResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringResult {
    pub id: String,
    pub job_id: String,
    pub dialect: String,
    pub database: String,
    pub comparator: String,
    pub score: f64,
    pub comparison_logs: Option<String>,
    pub comparison_error: Option<String>,
    pub generated_sql: Option<String>,
    pub generated_error: Option<String>,
}

impl ScoringResult {
    pub fn for_result(result: &EvalResult, comparator: &str) -> Self {
        Self {
            id: result.case.id.clone(),
            job_id: result.job_id.clone(),
            dialect: result.dialect.clone(),
            database: result.case.database.clone(),
            comparator: comparator.to_string(),
            score: 0.0,
            comparison_logs: None,
            comparison_error: None,
            generated_sql: result.generated_sql.clone(),
            generated_error: result.generated_error.clone(),
        }
    }
}
