use serde::de::DeserializeOwned;
use sqlbench_core::cache::CacheGateway;
use sqlbench_core::errors::ConfigError;
use sqlbench_core::generators::ModelRegistry;
use sqlbench_core::metrics_api::Comparator;
use std::collections::BTreeMap;
use std::sync::Arc;

mod exact_match;
mod executable_sql;
mod llm_rater;
mod regexp_matcher;
mod returned_sql;
mod set_match;

pub use exact_match::ExactMatcher;
pub use executable_sql::ExecutableSql;
pub use llm_rater::LlmRater;
pub use regexp_matcher::RegexpMatcher;
pub use returned_sql::ReturnedSql;
pub use set_match::SetMatcher;

/// Builds the comparators named in the experiment's `scorers` section.
/// Unknown names are a configuration error.
pub fn from_config(
    scorers: &BTreeMap<String, serde_yaml::Value>,
    models: &ModelRegistry,
    cache: Option<CacheGateway>,
) -> anyhow::Result<Vec<Arc<dyn Comparator>>> {
    let mut out: Vec<Arc<dyn Comparator>> = Vec::with_capacity(scorers.len());
    for (name, raw) in scorers {
        let c: Arc<dyn Comparator> = match name.trim() {
            "exact_match" => Arc::new(ExactMatcher::new(options(name, raw)?)),
            "set_match" => Arc::new(SetMatcher),
            "regexp_matcher" => Arc::new(RegexpMatcher::new(options(name, raw)?)?),
            "returned_sql" => Arc::new(ReturnedSql),
            "executable_sql" => Arc::new(ExecutableSql),
            "llmrater" => {
                let cfg = options(name, raw)?;
                let model = models.get_or_create(&cfg)?;
                Arc::new(LlmRater::new(model, cache.clone()))
            }
            other => return Err(ConfigError(format!("unknown scorer: {}", other)).into()),
        };
        out.push(c);
    }
    tracing::debug!(event = "comparators_ready", count = out.len());
    Ok(out)
}

/// Every comparator that needs no options or external model.
pub fn default_comparators() -> Vec<Arc<dyn Comparator>> {
    vec![
        Arc::new(ExactMatcher::default()),
        Arc::new(SetMatcher),
        Arc::new(ReturnedSql),
        Arc::new(ExecutableSql),
    ]
}

/// A bare `name:` entry yields the defaults.
fn options<T: DeserializeOwned + Default>(
    name: &str,
    raw: &serde_yaml::Value,
) -> anyhow::Result<T> {
    if raw.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(raw.clone())
        .map_err(|e| ConfigError(format!("scorers.{}: {}", name, e)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlbench_core::errors::is_config_error;

    fn scorers(yaml: &str) -> BTreeMap<String, serde_yaml::Value> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_builds_named_comparators() -> anyhow::Result<()> {
        let yaml = "exact_match:\n  use_eval_sql: true\nset_match:\n\
                    regexp_matcher:\n  regexp_string_list: ['^SELECT']\n";
        let built = from_config(
            &scorers(yaml),
            &ModelRegistry::new(),
            None,
        )?;
        let names: Vec<_> = built.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["exact_match", "regexp_matcher", "set_match"]);
        Ok(())
    }

    #[test]
    fn test_unknown_scorer_is_config_error() {
        let err = from_config(&scorers("vibes_match:\n"), &ModelRegistry::new(), None)
            .err()
            .unwrap();
        assert!(is_config_error(&err));
    }

    #[test]
    fn test_regexp_matcher_requires_patterns() {
        let err = from_config(&scorers("regexp_matcher:\n"), &ModelRegistry::new(), None)
            .err()
            .unwrap();
        assert!(is_config_error(&err));
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use sqlbench_core::metrics_api::Comparison;
    use sqlbench_core::model::{QueryType, Row};

    pub fn rows(v: serde_json::Value) -> Vec<Row> {
        serde_json::from_value(v).unwrap()
    }

    pub fn comparison<'a>(
        golden: Option<&'a Vec<Row>>,
        generated: Option<&'a Vec<Row>>,
    ) -> Comparison<'a> {
        Comparison {
            nl_prompt: "how many users",
            query_type: QueryType::Dql,
            golden_sql: "SELECT COUNT(*) FROM users",
            golden_rows: golden.map(Vec::as_slice),
            golden_eval_rows: None,
            golden_error: None,
            generated_sql: "SELECT COUNT(*) FROM users",
            generated_rows: generated.map(Vec::as_slice),
            generated_eval_rows: None,
            generated_error: None,
        }
    }
}
