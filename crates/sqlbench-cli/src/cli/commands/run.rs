use crate::cli::args::RunArgs;
use crate::cli::progress_view::ProgressView;
use indicatif::MultiProgress;
use serde::Serialize;
use sqlbench_core::cache::build_cache;
use sqlbench_core::config::load_config;
use sqlbench_core::dataset::load_dataset;
use sqlbench_core::db::DatabaseRegistry;
use sqlbench_core::engine::{EngineContext, Orchestrator};
use sqlbench_core::generators::ModelRegistry;
use sqlbench_core::report::{print_summary, summarize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(args: RunArgs, progress: Option<&MultiProgress>) -> anyhow::Result<()> {
    let cfg = load_config(&args.config, args.strict)?;
    let cases = load_dataset(&cfg.dataset_config, &cfg)?;

    let cache = build_cache(&cfg.cache)?;
    let models = Arc::new(ModelRegistry::new());
    let comparators = sqlbench_metrics::from_config(&cfg.scorers, &models, cache.clone())?;
    let comparator_names: Vec<&'static str> = comparators.iter().map(|c| c.name()).collect();

    let orch = Orchestrator::new(
        cfg,
        EngineContext {
            registry: DatabaseRegistry::with_builtin(cache),
            models,
            comparators: comparators.into(),
        },
    );
    tracing::info!(
        event = "run_started",
        job_id = %orch.job_id(),
        config = %args.config.display()
    );

    let view = progress
        .map(|multi| ProgressView::start(orch.progress(), multi, Duration::from_millis(250)))
        .transpose()?;
    let evaluated = orch.evaluate(cases).await;
    if let Some(v) = view {
        v.finish().await;
    }
    evaluated?;

    let out = orch.process();
    let summary = summarize(&out.job_id, &comparator_names, &out.scores);

    let dir = args.output_dir.join(&out.job_id);
    std::fs::create_dir_all(&dir)?;
    write_json(&dir.join("results.json"), &*out.results)?;
    write_json(&dir.join("scores.json"), &*out.scores)?;
    write_json(&dir.join("summary.json"), &summary)?;
    tracing::info!(event = "results_written", dir = %dir.display());

    print_summary(&summary, &out.results);
    eprintln!("Results written to {}", dir.display());
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, bytes)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))
}
