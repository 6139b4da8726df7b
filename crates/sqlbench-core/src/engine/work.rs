use crate::db::{HandleLease, QueryOutcome};
use crate::generators::{ModelGenerator, PromptGenerator};
use crate::metrics_api::{Comparator, Comparison};
use crate::model::{EvalResult, QueryType, Row, ScoringResult};
use crate::sanitize::sanitize_sql;
use std::sync::Arc;
use std::time::Instant;

pub struct PromptGenWork {
    pub generator: Arc<dyn PromptGenerator>,
    pub result: EvalResult,
}

impl PromptGenWork {
    pub async fn run(mut self) -> EvalResult {
        match self.generator.generate(&self.result.case.nl_prompt).await {
            Ok(p) => self.result.generated_prompt = Some(p),
            Err(e) => self.result.prompt_generator_error = Some(format!("{:#}", e)),
        }
        self.result
    }
}

pub struct SqlGenWork {
    pub model: Arc<dyn ModelGenerator>,
    pub result: EvalResult,
}

impl SqlGenWork {
    pub async fn run(mut self) -> EvalResult {
        let r = &mut self.result;
        if r.prompt_generator_error.is_some() {
            return self.result;
        }

        if self.model.is_passthrough() {
            r.generated_sql = r.case.generated_sql.clone().filter(|s| !s.is_empty());
            r.sql_generator_error = r.case.sql_generator_error.clone().filter(|s| !s.is_empty());
            return self.result;
        }

        let prompt = r.generated_prompt.clone().unwrap_or_default();
        let started = Instant::now();
        match self.model.generate(&prompt).await {
            Ok(sql) => r.generated_sql = Some(sql),
            Err(e) => r.sql_generator_error = Some(format!("{:#}", e)),
        }
        r.sql_generator_time_ms = Some(started.elapsed().as_millis() as u64);
        self.result
    }
}

pub struct SqlExecWork {
    pub result: EvalResult,
    /// `None` when there is nothing to execute.
    pub lease: Option<HandleLease>,
    pub sanitize: bool,
    pub use_cache: bool,
}

struct Side {
    rows: Option<Vec<Row>>,
    eval_rows: Option<Vec<Row>>,
    error: Option<String>,
}

impl From<QueryOutcome> for Side {
    fn from(o: QueryOutcome) -> Self {
        Side {
            rows: o.rows,
            eval_rows: o.eval_rows,
            error: o.error,
        }
    }
}

impl SqlExecWork {
    pub async fn run(mut self) -> EvalResult {
        let Some(lease) = self.lease.take() else {
            return self.result;
        };

        let raw = self.result.generated_sql.clone().unwrap_or_default();
        let generated = if self.sanitize {
            sanitize_sql(&raw)
        } else {
            raw.trim().to_string()
        };
        self.result.sanitized_sql = Some(generated.clone());
        let golden = self.result.golden_sql();
        let eval_query = self.result.eval_query();
        let query_type = self.result.query_type();

        if !generated.is_empty() {
            let side = execute(
                &lease,
                query_type,
                &generated,
                eval_query.as_deref(),
                self.use_cache,
            )
            .await;
            self.result.generated_result = side.rows;
            self.result.eval_results = side.eval_rows;
            self.result.generated_error = side.error;
        }

        let side = execute(
            &lease,
            query_type,
            &golden,
            eval_query.as_deref(),
            self.use_cache,
        )
        .await;
        self.result.golden_result = side.rows;
        self.result.golden_eval_results = side.eval_rows;
        self.result.golden_error = side.error;

        drop(lease);
        self.result
    }
}

async fn execute(
    lease: &HandleLease,
    query_type: QueryType,
    query: &str,
    eval_query: Option<&str>,
    use_cache: bool,
) -> Side {
    let session = lease.session();
    let db = session.db();
    let outcome = match query_type {
        QueryType::Dql => db.execute(query, None, use_cache, true).await,
        QueryType::Dml => db.execute(query, eval_query, false, true).await,
        QueryType::Ddl => {
            if let Err(e) = session.resetup(true, false).await {
                return Side {
                    rows: None,
                    eval_rows: None,
                    error: Some(format!("Was not able to run DDL due to setup_error: {:#}", e)),
                };
            }
            match db.execute(query, None, false, false).await {
                Ok(o) if o.error.is_none() => match db.get_metadata().await {
                    Ok(md) => Ok(QueryOutcome {
                        eval_rows: Some(md.to_rows()),
                        ..o
                    }),
                    Err(e) => Ok(QueryOutcome {
                        error: Some(format!("could not read schema metadata: {:#}", e)),
                        ..o
                    }),
                },
                other => other,
            }
        }
    };
    match outcome {
        Ok(o) => o.into(),
        Err(e) => QueryOutcome::failed(format!("{:#}", e)).into(),
    }
}

pub struct ScoreWork {
    pub result: EvalResult,
    pub comparators: Arc<[Arc<dyn Comparator>]>,
}

impl ScoreWork {
    pub async fn run(self) -> (EvalResult, Vec<ScoringResult>) {
        let golden_sql = self.result.golden_sql();
        let mut scores = Vec::with_capacity(self.comparators.len());
        for c in self.comparators.iter() {
            let mut s = ScoringResult::for_result(&self.result, c.name());
            if self.result.generated_sql.is_some() {
                let cmp = Comparison::from_result(&self.result, &golden_sql);
                match c.compare(&cmp).await {
                    Ok(out) => {
                        s.score = out.score;
                        s.comparison_logs = out.logs;
                    }
                    Err(e) => s.comparison_error = Some(format!("{:#}", e)),
                }
            }
            tracing::debug!(
                event = "scored",
                id = %s.id,
                comparator = %s.comparator,
                score = s.score
            );
            scores.push(s);
        }
        (self.result, scores)
    }
}
