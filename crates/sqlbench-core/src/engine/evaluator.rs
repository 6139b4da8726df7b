use super::pool::WorkerPool;
use super::work::{PromptGenWork, ScoreWork, SqlExecWork, SqlGenWork};
use crate::config::RunnerConfig;
use crate::db::HandleQueue;
use crate::generators::{ModelGenerator, PromptGenerator};
use crate::metrics_api::Comparator;
use crate::model::{EvalCase, EvalResult, PartitionKey, ScoringResult};
use crate::progress::ProgressTracker;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Collaborators shared by every item of one partition.
pub struct PartitionInputs {
    pub key: PartitionKey,
    pub cases: Vec<EvalCase>,
    pub queue: Arc<HandleQueue>,
    pub prompt_generator: Arc<dyn PromptGenerator>,
    pub model: Arc<dyn ModelGenerator>,
}

/// Drives one partition through prompt generation, SQL generation,
/// execution and scoring. Stages overlap: an item moves on as soon as its
/// previous stage completes.
#[derive(Clone)]
pub struct Evaluator {
    pub runners: RunnerConfig,
    pub truncate_execution_outputs: Option<usize>,
    pub use_cache: bool,
    pub comparators: Arc<[Arc<dyn Comparator>]>,
    pub progress: Arc<ProgressTracker>,
    pub job_id: String,
    pub run_time: DateTime<Utc>,
}

impl Evaluator {
    pub async fn evaluate(
        &self,
        input: PartitionInputs,
    ) -> anyhow::Result<(Vec<EvalResult>, Vec<ScoringResult>)> {
        let PartitionInputs {
            key,
            cases,
            queue,
            prompt_generator,
            model,
        } = input;
        prompt_generator.setup().await?;

        tracing::info!(
            event = "partition_started",
            partition = %key,
            items = cases.len(),
            handles = queue.physical_handles()
        );

        let (prompt_pool, mut prompt_done) =
            WorkerPool::spawn("promptgen", self.runners.promptgen_runners);
        let (gen_pool, mut gen_done) = WorkerPool::spawn("sqlgen", self.runners.sqlgen_runners);
        let (exec_pool, mut exec_done) =
            WorkerPool::spawn("sqlexec", self.runners.sqlexec_runners);
        let (score_pool, mut score_done) =
            WorkerPool::spawn("scoring", self.runners.scoring_runners);

        let sanitize = !model.is_passthrough();
        let progress = &self.progress;

        let feed = async move {
            for case in cases {
                let result = EvalResult::new(case, &key.dialect, &self.job_id, self.run_time);
                let work = PromptGenWork {
                    generator: prompt_generator.clone(),
                    result,
                };
                if let Err(e) = prompt_pool.submit(work.run()).await {
                    tracing::error!(event = "submit_failed", stage = "promptgen", error = %e);
                    break;
                }
            }
        };

        let forward_prompt = async move {
            while let Some(result) = prompt_done.next().await {
                progress.record_prompt();
                let work = SqlGenWork {
                    model: model.clone(),
                    result,
                };
                if let Err(e) = gen_pool.submit(work.run()).await {
                    tracing::error!(event = "submit_failed", stage = "sqlgen", error = %e);
                    break;
                }
            }
        };

        let forward_gen = async move {
            while let Some(mut result) = gen_done.next().await {
                progress.record_gen();
                let lease = if result.has_sql_to_execute() {
                    match queue.acquire().await {
                        Ok(lease) => Some(lease),
                        Err(e) => {
                            result.generated_error = Some(format!("{:#}", e));
                            None
                        }
                    }
                } else {
                    None
                };
                let work = SqlExecWork {
                    result,
                    lease,
                    sanitize,
                    use_cache: self.use_cache,
                };
                if let Err(e) = exec_pool.submit(work.run()).await {
                    tracing::error!(event = "submit_failed", stage = "sqlexec", error = %e);
                    break;
                }
            }
        };

        let forward_exec = async move {
            while let Some(result) = exec_done.next().await {
                progress.record_exec();
                let work = ScoreWork {
                    result,
                    comparators: self.comparators.clone(),
                };
                if let Err(e) = score_pool.submit(work.run()).await {
                    tracing::error!(event = "submit_failed", stage = "scoring", error = %e);
                    break;
                }
            }
        };

        let drain = async move {
            let mut results = Vec::new();
            let mut scores = Vec::new();
            while let Some((mut result, mut s)) = score_done.next().await {
                progress.record_score();
                if let Some(limit) = self.truncate_execution_outputs {
                    result.truncate_outputs(limit);
                }
                results.push(result);
                scores.append(&mut s);
            }
            (results, scores)
        };

        let (_, _, _, _, (results, scores)) =
            tokio::join!(feed, forward_prompt, forward_gen, forward_exec, drain);
        Ok((results, scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SetupSpec;
    use crate::db::sqlite::SqliteConnector;
    use crate::db::{ConnectionSpec, Connector, DatabaseSession, Privilege};
    use crate::generators::{NoopGenerator, NoopPromptGenerator};
    use crate::metrics_api::{ComparatorOutput, Comparison};
    use crate::model::QueryType;
    use async_trait::async_trait;

    struct RowsEqual;

    #[async_trait]
    impl Comparator for RowsEqual {
        fn name(&self) -> &'static str {
            "rows_equal"
        }
        async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
            let same = !c.has_error() && c.generated_rows == c.golden_rows;
            Ok(ComparatorOutput::score(if same { 100.0 } else { 0.0 }))
        }
    }

    fn case(id: &str, generated: &str) -> EvalCase {
        serde_json::from_value(serde_json::json!({
            "id": id, "query_type": "dql", "database": "shop", "dialects": ["sqlite"],
            "nl_prompt": "how many orders",
            "golden_sql": {"sqlite": ["SELECT COUNT(*) AS n FROM orders"]},
            "generated_sql": generated
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_partition_runs_every_stage() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spec = ConnectionSpec {
            dialect: "sqlite".into(),
            db_type: "sqlite".into(),
            database: "shop".into(),
            path: Some(dir.path().to_path_buf()),
            host: None,
            credential: None,
            privilege: Privilege::Owner,
            executions_per_minute: None,
            max_concurrency: 4,
            max_attempts: 2,
        };
        let connector = SqliteConnector::new(None);
        let core = connector.connect(&spec).await?;
        let setup = SetupSpec {
            setup: vec![
                "CREATE TABLE orders (id INTEGER)".into(),
                "INSERT INTO orders VALUES (1), (2), (3)".into(),
            ],
            ..Default::default()
        };
        let core = Arc::new(DatabaseSession::new(core, Some(Arc::new(setup))));
        let queue =
            crate::db::build_handle_queue(&core, &connector, &spec, QueryType::Dql, 2).await?;
        let queue = Arc::new(queue);

        let progress = Arc::new(ProgressTracker::new(3, 1));
        let evaluator = Evaluator {
            runners: RunnerConfig::default(),
            truncate_execution_outputs: Some(250),
            use_cache: false,
            comparators: Arc::new([Arc::new(RowsEqual) as Arc<dyn Comparator>]),
            progress: progress.clone(),
            job_id: "job".into(),
            run_time: Utc::now(),
        };
        let input = PartitionInputs {
            key: PartitionKey {
                dialect: "sqlite".into(),
                database: "shop".into(),
                query_type: QueryType::Dql,
            },
            cases: vec![
                case("1", "SELECT COUNT(*) AS n FROM orders"),
                case("2", "SELECT 4 AS n"),
                case("3", ""),
            ],
            queue: queue.clone(),
            prompt_generator: Arc::new(NoopPromptGenerator),
            model: Arc::new(NoopGenerator),
        };

        let (mut results, mut scores) = evaluator.evaluate(input).await?;
        queue.close().await;
        core.close().await?;

        results.sort_by(|a, b| a.case.id.cmp(&b.case.id));
        scores.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(results.len(), 3);
        assert_eq!(scores.iter().map(|s| s.score).collect::<Vec<_>>(), vec![100.0, 0.0, 0.0]);
        // nothing to execute for the empty query
        assert!(results[2].golden_result.is_none());
        assert!(results[0].golden_result.is_some());

        let snap = progress.snapshot();
        assert_eq!((snap.prompt, snap.gen, snap.exec, snap.score), (3, 3, 3, 3));
        Ok(())
    }
}
