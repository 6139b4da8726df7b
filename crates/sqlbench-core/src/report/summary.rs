use crate::model::ScoringResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Name of the summary line counting items whose generated query ran.
pub const EXECUTABLE: &str = "executable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric_name: String,
    pub metric_score: f64,
    pub correct_results_count: usize,
    pub total_results_count: usize,
}

impl MetricSummary {
    pub fn percentage(&self) -> f64 {
        if self.total_results_count == 0 {
            return 0.0;
        }
        let pct = self.correct_results_count as f64 / self.total_results_count as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job_id: String,
    pub metrics: Vec<MetricSummary>,
}

/// One line per comparator, in `comparators` order, plus an
/// [`EXECUTABLE`] line. An item counts once per comparator however many
/// dialects share its id.
pub fn summarize(job_id: &str, comparators: &[&str], scores: &[ScoringResult]) -> RunSummary {
    let items: BTreeSet<(&str, &str, &str)> = scores
        .iter()
        .map(|s| (s.dialect.as_str(), s.database.as_str(), s.id.as_str()))
        .collect();
    let total = items.len();

    let mut metrics: Vec<MetricSummary> = comparators
        .iter()
        .map(|name| MetricSummary {
            metric_name: name.to_string(),
            metric_score: 100.0,
            correct_results_count: scores
                .iter()
                .filter(|s| s.comparator == *name && s.generated_sql.is_some() && s.score >= 100.0)
                .count(),
            total_results_count: total,
        })
        .collect();

    let executable: BTreeSet<(&str, &str, &str)> = scores
        .iter()
        .filter(|s| s.generated_sql.is_some() && s.generated_error.is_none())
        .map(|s| (s.dialect.as_str(), s.database.as_str(), s.id.as_str()))
        .collect();
    metrics.push(MetricSummary {
        metric_name: EXECUTABLE.to_string(),
        metric_score: 1.0,
        correct_results_count: executable.len(),
        total_results_count: total,
    });

    for m in &metrics {
        tracing::info!(
            event = "metric_summary",
            metric = %m.metric_name,
            correct = m.correct_results_count,
            total = m.total_results_count,
            percentage = m.percentage()
        );
    }

    RunSummary {
        job_id: job_id.to_string(),
        metrics,
    }
}
