use async_trait::async_trait;
use serde::Deserialize;
use sqlbench_core::metrics_api::{Comparator, ComparatorOutput, Comparison};
use sqlbench_core::model::QueryType;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExactMatchOptions {
    /// Compare the eval query results of DML and DDL items instead of the
    /// query's own rows, scoring 0 when they are missing.
    pub use_eval_sql: bool,
}

/// Row lists must be equal, order included. A side that never produced
/// rows matches nothing.
#[derive(Debug, Default)]
pub struct ExactMatcher {
    opts: ExactMatchOptions,
}

impl ExactMatcher {
    pub fn new(opts: ExactMatchOptions) -> Self {
        Self { opts }
    }
}

#[async_trait]
impl Comparator for ExactMatcher {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
        if c.has_error() {
            return Ok(ComparatorOutput::score(0.0));
        }
        let use_eval = c.golden_eval_rows.is_some()
            || c.generated_eval_rows.is_some()
            || (self.opts.use_eval_sql && c.query_type != QueryType::Dql);
        let (golden, generated) = if use_eval {
            (c.golden_eval_rows, c.generated_eval_rows)
        } else {
            (c.golden_rows, c.generated_rows)
        };
        let same = matches!((golden, generated), (Some(g), Some(r)) if g == r);
        Ok(ComparatorOutput::score(if same { 100.0 } else { 0.0 }))
    }
}
