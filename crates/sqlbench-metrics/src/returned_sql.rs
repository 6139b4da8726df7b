use async_trait::async_trait;
use sqlbench_core::metrics_api::{Comparator, ComparatorOutput, Comparison};

/// 100 when the generated query has at least one line that is not a
/// comment. An empty query also scores 100.
#[derive(Debug, Default)]
pub struct ReturnedSql;

#[async_trait]
impl Comparator for ReturnedSql {
    fn name(&self) -> &'static str {
        "returned_sql"
    }

    async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
        if c.generated_sql.is_empty() {
            return Ok(ComparatorOutput::score(100.0));
        }
        let has_sql = c
            .generated_sql
            .lines()
            .map(str::trim)
            .any(|l| !l.is_empty() && !l.starts_with("--") && !l.starts_with("/*"));
        Ok(ComparatorOutput::score(if has_sql { 100.0 } else { 0.0 }))
    }
}
