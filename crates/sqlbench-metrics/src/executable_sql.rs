use async_trait::async_trait;
use sqlbench_core::metrics_api::{Comparator, ComparatorOutput, Comparison};

#[derive(Debug, Default)]
pub struct ExecutableSql;

#[async_trait]
impl Comparator for ExecutableSql {
    fn name(&self) -> &'static str {
        "executable_sql"
    }

    async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
        Ok(match c.generated_error {
            Some(e) => ComparatorOutput::with_logs(
                0.0,
                format!("Generated query was not executable: {}", e),
            ),
            None => ComparatorOutput::with_logs(100.0, "Generated query was executable."),
        })
    }
}
