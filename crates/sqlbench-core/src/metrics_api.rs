use crate::model::{EvalResult, QueryType, Row};
use async_trait::async_trait;

/// Everything a comparator may look at for one item.
#[derive(Debug, Clone, Copy)]
pub struct Comparison<'a> {
    pub nl_prompt: &'a str,
    pub query_type: QueryType,
    pub golden_sql: &'a str,
    pub golden_rows: Option<&'a [Row]>,
    pub golden_eval_rows: Option<&'a [Row]>,
    pub golden_error: Option<&'a str>,
    /// The query as executed: sanitized when sanitization ran.
    pub generated_sql: &'a str,
    pub generated_rows: Option<&'a [Row]>,
    pub generated_eval_rows: Option<&'a [Row]>,
    pub generated_error: Option<&'a str>,
}

impl<'a> Comparison<'a> {
    /// `golden_sql` is owned by the caller since it is derived per dialect.
    pub fn from_result(r: &'a EvalResult, golden_sql: &'a str) -> Self {
        Self {
            nl_prompt: &r.case.nl_prompt,
            query_type: r.case.query_type,
            golden_sql,
            golden_rows: r.golden_result.as_deref(),
            golden_eval_rows: r.golden_eval_results.as_deref(),
            golden_error: r.golden_error.as_deref(),
            generated_sql: r
                .sanitized_sql
                .as_deref()
                .or(r.generated_sql.as_deref())
                .unwrap_or(""),
            generated_rows: r.generated_result.as_deref(),
            generated_eval_rows: r.eval_results.as_deref(),
            generated_error: r.generated_error.as_deref(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.golden_error.is_some() || self.generated_error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparatorOutput {
    /// 0 to 100.
    pub score: f64,
    pub logs: Option<String>,
}

impl ComparatorOutput {
    pub fn score(score: f64) -> Self {
        Self { score, logs: None }
    }

    pub fn with_logs(score: f64, logs: impl Into<String>) -> Self {
        Self {
            score,
            logs: Some(logs.into()),
        }
    }
}

#[async_trait]
pub trait Comparator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput>;
}
