use super::summary::RunSummary;
use crate::model::EvalResult;

pub fn print_summary(summary: &RunSummary, results: &[EvalResult]) {
    let prompt_errors = results.iter().filter(|r| r.prompt_generator_error.is_some()).count();
    let gen_errors = results.iter().filter(|r| r.sql_generator_error.is_some()).count();
    let exec_errors = results.iter().filter(|r| r.generated_error.is_some()).count();
    let golden_errors = results.iter().filter(|r| r.golden_error.is_some()).count();

    eprintln!("\nJob {}: {} results", summary.job_id, results.len());
    for m in &summary.metrics {
        eprintln!(
            "  {:<20} {:>5}/{:<5} = {:>6.2}%",
            m.metric_name,
            m.correct_results_count,
            m.total_results_count,
            m.percentage()
        );
    }

    if prompt_errors + gen_errors + exec_errors + golden_errors > 0 {
        eprintln!(
            "\nErrors: prompt={} sqlgen={} generated={} golden={}",
            prompt_errors, gen_errors, exec_errors, golden_errors
        );
    }
    for r in results.iter().filter(|r| r.golden_error.is_some()).take(5) {
        eprintln!(
            "❌ {}/{}/{}: golden query failed: {}",
            r.dialect,
            r.case.database,
            r.case.id,
            r.golden_error.as_deref().unwrap_or_default()
        );
    }
}
