use super::evaluator::{Evaluator, PartitionInputs};
use crate::config::{DbConfig, ExperimentConfig, SetupSpec};
use crate::dataset::partition;
use crate::db::{build_handle_queue, ConnectionSpec, Connector, DatabaseRegistry, DatabaseSession};
use crate::errors::{ConfigError, SetupError};
use crate::generators::{build_prompt_generator, ModelGenerator, ModelRegistry, PromptGenerator};
use crate::metrics_api::Comparator;
use crate::model::{EvalCase, EvalResult, PartitionKey, QueryType, ScoringResult};
use crate::progress::ProgressTracker;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Long-lived collaborators of a run, passed in rather than looked up.
pub struct EngineContext {
    pub registry: DatabaseRegistry,
    pub models: Arc<ModelRegistry>,
    pub comparators: Arc<[Arc<dyn Comparator>]>,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub job_id: String,
    pub run_time: DateTime<Utc>,
    pub results: Arc<Vec<EvalResult>>,
    pub scores: Arc<Vec<ScoringResult>>,
}

#[derive(Default)]
struct Collected {
    results: Vec<EvalResult>,
    scores: Vec<ScoringResult>,
}

pub struct Orchestrator {
    config: Arc<ExperimentConfig>,
    ctx: Arc<EngineContext>,
    progress: Arc<ProgressTracker>,
    job_id: String,
    run_time: DateTime<Utc>,
    collected: Mutex<Collected>,
}

impl Orchestrator {
    pub fn new(config: ExperimentConfig, ctx: EngineContext) -> Self {
        Self {
            config: Arc::new(config),
            ctx: Arc::new(ctx),
            progress: Arc::new(ProgressTracker::default()),
            job_id: uuid::Uuid::new_v4().to_string(),
            run_time: Utc::now(),
            collected: Mutex::new(Collected::default()),
        }
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Evaluates every (dialect, database) pair of `cases`, at most
    /// `eval_runners` at a time. Failures stay inside the database or
    /// partition they happened in.
    pub async fn evaluate(&self, cases: Vec<EvalCase>) -> anyhow::Result<()> {
        let dataset = partition(&cases);
        drop(cases);
        self.progress
            .set_totals(dataset.total_items, dataset.total_partitions);
        tracing::info!(
            event = "evaluation_started",
            job_id = %self.job_id,
            items = dataset.total_items,
            partitions = dataset.total_partitions,
            databases = dataset.database_count()
        );

        let evaluator = Arc::new(Evaluator {
            runners: self.config.runners.clone(),
            truncate_execution_outputs: self.config.truncate_execution_outputs,
            use_cache: self.config.cache.enabled,
            comparators: self.ctx.comparators.clone(),
            progress: self.progress.clone(),
            job_id: self.job_id.clone(),
            run_time: self.run_time,
        });

        let sem = Arc::new(Semaphore::new(self.config.runners.eval_runners.max(1)));
        let mut set = JoinSet::new();

        for (dialect, databases) in dataset.partitions {
            let Some(db_config) = self.config.db_configs.get(&dialect).cloned() else {
                let items: usize = databases
                    .values()
                    .flat_map(|t| t.values())
                    .map(Vec::len)
                    .sum();
                let parts: usize = databases.values().map(BTreeMap::len).sum();
                tracing::warn!(
                    event = "dialect_skipped",
                    dialect = %dialect,
                    items,
                    reason = "no database config"
                );
                self.progress.skip(items, parts);
                continue;
            };

            for (database, by_type) in databases {
                let permit = sem.clone().acquire_owned().await?;
                let sub = SubEvaluation {
                    dialect: dialect.clone(),
                    database,
                    db_config: db_config.clone(),
                    config: self.config.clone(),
                    ctx: self.ctx.clone(),
                    evaluator: evaluator.clone(),
                };
                set.spawn(async move {
                    let _permit = permit;
                    sub.run(by_type).await
                });
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(out) => {
                    let mut c = self
                        .collected
                        .lock()
                        .map_err(|_| anyhow::anyhow!("result collector lock poisoned"))?;
                    c.results.extend(out.results);
                    c.scores.extend(out.scores);
                }
                Err(e) => tracing::error!(event = "database_evaluation_panicked", error = %e),
            }
        }

        tracing::info!(event = "evaluation_finished", job_id = %self.job_id);
        Ok(())
    }

    /// Everything collected so far, sorted by dialect, database and id.
    pub fn process(&self) -> RunOutput {
        let mut c = self.collected.lock().unwrap_or_else(|e| e.into_inner());
        let mut results = std::mem::take(&mut c.results);
        let mut scores = std::mem::take(&mut c.scores);
        results.sort_by(|a, b| {
            (&a.dialect, &a.case.database, &a.case.id).cmp(&(
                &b.dialect,
                &b.case.database,
                &b.case.id,
            ))
        });
        scores.sort_by(|a, b| {
            (&a.dialect, &a.database, &a.id, &a.comparator).cmp(&(
                &b.dialect,
                &b.database,
                &b.id,
                &b.comparator,
            ))
        });
        RunOutput {
            job_id: self.job_id.clone(),
            run_time: self.run_time,
            results: Arc::new(results),
            scores: Arc::new(scores),
        }
    }
}

struct SubEvaluation {
    dialect: String,
    database: String,
    db_config: DbConfig,
    config: Arc<ExperimentConfig>,
    ctx: Arc<EngineContext>,
    evaluator: Arc<Evaluator>,
}

impl SubEvaluation {
    fn abandon(&self, items: usize, partitions: usize, error: &anyhow::Error) {
        tracing::error!(
            event = "database_skipped",
            dialect = %self.dialect,
            database = %self.database,
            items,
            error = %format!("{:#}", error)
        );
        self.evaluator.progress.skip(items, partitions);
    }

    fn load_setup(&self) -> anyhow::Result<Option<Arc<SetupSpec>>> {
        let Some(cfg) = &self.config.setup else {
            return Ok(None);
        };
        let spec = SetupSpec::load(cfg, &self.db_config.db_type)?;
        Ok((!spec.is_empty()).then(|| Arc::new(spec)))
    }

    async fn run(self, mut by_type: BTreeMap<QueryType, Vec<EvalCase>>) -> Collected {
        let mut out = Collected::default();
        let items: usize = by_type.values().map(Vec::len).sum();
        let partitions = by_type.len();

        let connector = match self.ctx.registry.get(&self.db_config.db_type) {
            Some(c) => c,
            None => {
                let e = ConfigError(format!(
                    "no adapter registered for db_type {}",
                    self.db_config.db_type
                ));
                self.abandon(items, partitions, &anyhow::Error::from(e));
                return out;
            }
        };
        let setup = match self.load_setup() {
            Ok(s) => s,
            Err(e) => {
                self.abandon(items, partitions, &e);
                return out;
            }
        };
        let base = ConnectionSpec::from_config(&self.dialect, &self.db_config, &self.database);
        let core = match connector.connect(&base).await {
            Ok(db) => Arc::new(DatabaseSession::new(db, setup)),
            Err(e) => {
                self.abandon(items, partitions, &e);
                return out;
            }
        };

        match self.ctx.models.get_or_create(&self.config.model) {
            Ok(model) => {
                let prompt_generator = build_prompt_generator(
                    self.config.prompt_generator,
                    core.db().clone(),
                    &self.dialect,
                );
                for query_type in QueryType::ALL {
                    let Some(cases) = by_type.remove(&query_type) else {
                        continue;
                    };
                    let key = PartitionKey {
                        dialect: self.dialect.clone(),
                        database: self.database.clone(),
                        query_type,
                    };
                    self.run_partition(
                        key,
                        cases,
                        &core,
                        connector.as_ref(),
                        &base,
                        prompt_generator.clone(),
                        model.clone(),
                        &mut out,
                    )
                    .await;
                }
            }
            Err(e) => self.abandon(items, partitions, &e),
        }

        core.clean_temp_creations().await;
        if let Err(e) = core.close().await {
            tracing::warn!(event = "core_close_failed", database = %self.database, error = %e);
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_partition(
        &self,
        key: PartitionKey,
        cases: Vec<EvalCase>,
        core: &Arc<DatabaseSession>,
        connector: &dyn Connector,
        base: &ConnectionSpec,
        prompt_generator: Arc<dyn PromptGenerator>,
        model: Arc<dyn ModelGenerator>,
        out: &mut Collected,
    ) {
        let items = cases.len();
        let size = self.config.runners.sqlexec_runners.min(items);
        let progress = &self.evaluator.progress;

        let queue = match build_handle_queue(core, connector, base, key.query_type, size).await {
            Ok(q) => Arc::new(q),
            Err(e) => {
                let err = SetupError::new(key.to_string(), e);
                tracing::error!(event = "partition_setup_failed", partition = %key, error = %err);
                progress.skip(items, 1);
                return;
            }
        };
        progress.record_setup();

        let input = PartitionInputs {
            key: key.clone(),
            cases,
            queue: queue.clone(),
            prompt_generator,
            model,
        };
        match self.evaluator.evaluate(input).await {
            Ok((results, scores)) => {
                tracing::info!(
                    event = "partition_finished",
                    partition = %key,
                    items = results.len()
                );
                out.results.extend(results);
                out.scores.extend(scores);
            }
            Err(e) => {
                tracing::error!(
                    event = "partition_failed",
                    partition = %key,
                    error = %format!("{:#}", e)
                );
                progress.skip(items, 0);
            }
        }
        queue.close().await;
    }
}
