use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use sqlbench_core::errors::ConfigError;
use sqlbench_core::metrics_api::{Comparator, ComparatorOutput, Comparison};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegexpOptions {
    pub regexp_string_list: Vec<String>,
    /// Score 100 when the query does NOT match.
    pub invert_results: bool,
    /// Require every pattern instead of any one.
    pub match_all_patterns: bool,
    /// A pattern only counts when its match spans the whole query.
    pub match_whole_query: bool,
}

/// Checks the generated query against patterns; the golden query plays
/// no part.
#[derive(Debug)]
pub struct RegexpMatcher {
    patterns: Vec<Regex>,
    opts: RegexpOptions,
}

impl RegexpMatcher {
    pub fn new(opts: RegexpOptions) -> anyhow::Result<Self> {
        if opts.regexp_string_list.is_empty() {
            return Err(ConfigError(
                "scorers.regexp_matcher: regexp_string_list is required".into(),
            )
            .into());
        }
        let patterns = opts
            .regexp_string_list
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ConfigError(format!(
                        "scorers.regexp_matcher: invalid regex pattern '{}': {}",
                        p, e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, opts })
    }
}

/// Strips surrounding backticks and collapses whitespace.
fn clean_query(query: &str) -> String {
    query
        .trim_matches('`')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Comparator for RegexpMatcher {
    fn name(&self) -> &'static str {
        "regexp_matcher"
    }

    async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
        let query = clean_query(c.generated_sql);
        let mut matched = Vec::new();
        let mut count = 0;
        for re in &self.patterns {
            if let Some(m) = re.find(&query) {
                matched.push(m.as_str().to_string());
                if !self.opts.match_whole_query || m.as_str() == query {
                    count += 1;
                }
            }
        }

        let hit = if self.opts.match_all_patterns {
            count == self.patterns.len()
        } else {
            count > 0
        };
        let mut score = if hit { 100.0 } else { 0.0 };
        if self.opts.invert_results {
            score = 100.0 - score;
        }
        Ok(ComparatorOutput::with_logs(score, serde_json::to_string(&matched)?))
    }
}
