use async_trait::async_trait;
use sqlbench_core::metrics_api::{Comparator, ComparatorOutput, Comparison};
use sqlbench_core::model::Row;
use std::collections::BTreeSet;

/// Execution accuracy as measured by BIRD: the sets of row value tuples
/// must be equal. Column names and row order are ignored.
#[derive(Debug, Default)]
pub struct SetMatcher;

fn value_set(rows: &[Row]) -> BTreeSet<String> {
    rows.iter()
        .map(|r| {
            let values: Vec<&serde_json::Value> = r.values().collect();
            serde_json::to_string(&values).unwrap_or_default()
        })
        .collect()
}

#[async_trait]
impl Comparator for SetMatcher {
    fn name(&self) -> &'static str {
        "set_match"
    }

    async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
        if c.has_error() {
            return Ok(ComparatorOutput::score(0.0));
        }
        let same = match (c.golden_rows, c.generated_rows) {
            (Some(golden), Some(generated)) => value_set(golden) == value_set(generated),
            _ => false,
        };
        Ok(ComparatorOutput::score(if same { 100.0 } else { 0.0 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{comparison, rows};

    #[tokio::test]
    async fn test_ignores_order_duplicates_and_column_names() -> anyhow::Result<()> {
        let golden = rows(serde_json::json!([{"id": 1, "n": "a"}, {"id": 2, "n": "b"}]));
        let generated = rows(serde_json::json!([
            {"x": 2, "y": "b"}, {"x": 1, "y": "a"}, {"x": 1, "y": "a"}
        ]));
        let c = comparison(Some(&golden), Some(&generated));
        assert_eq!(SetMatcher.compare(&c).await?.score, 100.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_column_order_is_part_of_the_tuple() -> anyhow::Result<()> {
        let golden = rows(serde_json::json!([{"id": 1, "n": "a"}]));
        let swapped = rows(serde_json::json!([{"n": "a", "id": 1}]));
        let c = comparison(Some(&golden), Some(&swapped));
        assert_eq!(SetMatcher.compare(&c).await?.score, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_side_that_never_ran_is_not_an_empty_set() -> anyhow::Result<()> {
        let empty = Vec::new();
        let c = comparison(Some(&empty), None);
        assert_eq!(SetMatcher.compare(&c).await?.score, 0.0);
        let c = comparison(None, None);
        assert_eq!(SetMatcher.compare(&c).await?.score, 0.0);
        Ok(())
    }
}
