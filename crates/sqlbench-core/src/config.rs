use crate::errors::ConfigError;
use crate::model::QueryType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_TRUNCATE_EXECUTION_OUTPUTS: usize = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub dataset_config: PathBuf,
    /// Restricts every case to these dialects; empty keeps each case's own.
    #[serde(default)]
    pub dialects: Vec<String>,
    #[serde(default = "default_query_types")]
    pub query_types: Vec<QueryType>,
    /// Empty means every database in the dataset.
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub runners: RunnerConfig,
    #[serde(default)]
    pub prompt_generator: PromptGeneratorKind,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub db_configs: BTreeMap<String, DbConfig>,
    #[serde(default)]
    pub setup: Option<SetupConfig>,
    /// Comparator name to its options; unknown names are rejected when the
    /// comparators are built.
    #[serde(default)]
    pub scorers: BTreeMap<String, serde_yaml::Value>,
    #[serde(default = "default_truncate")]
    pub truncate_execution_outputs: Option<usize>,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_query_types() -> Vec<QueryType> {
    QueryType::ALL.to_vec()
}

fn default_truncate() -> Option<usize> {
    Some(DEFAULT_TRUNCATE_EXECUTION_OUTPUTS)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    pub eval_runners: usize,
    pub promptgen_runners: usize,
    pub sqlgen_runners: usize,
    pub sqlexec_runners: usize,
    pub scoring_runners: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            eval_runners: 4,
            promptgen_runners: 10,
            sqlgen_runners: 10,
            sqlexec_runners: 10,
            scoring_runners: 10,
        }
    }
}

impl RunnerConfig {
    /// Overlays `SQLBENCH_<FIELD>` environment variables, e.g.
    /// `SQLBENCH_SQLEXEC_RUNNERS=4`. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        self.apply_from(|k| std::env::var(k).ok());
    }

    fn apply_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut usize); 5] = [
            ("SQLBENCH_EVAL_RUNNERS", &mut self.eval_runners),
            ("SQLBENCH_PROMPTGEN_RUNNERS", &mut self.promptgen_runners),
            ("SQLBENCH_SQLGEN_RUNNERS", &mut self.sqlgen_runners),
            ("SQLBENCH_SQLEXEC_RUNNERS", &mut self.sqlexec_runners),
            ("SQLBENCH_SCORING_RUNNERS", &mut self.scoring_runners),
        ];
        for (key, slot) in fields {
            if let Some(n) = get(key).and_then(|v| v.parse::<usize>().ok()) {
                if n > 0 {
                    *slot = n;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptGeneratorKind {
    #[default]
    Noop,
    Schema,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// `noop` replays SQL stored in the dataset; `openai` calls a
    /// chat-completions endpoint.
    pub generator: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub base_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub calls_per_minute: Option<u32>,
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            generator: "noop".into(),
            model: None,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".into(),
            base_prompt: None,
            temperature: 0.0,
            max_tokens: 1024,
            calls_per_minute: None,
            max_concurrency: 10,
            max_attempts: crate::rate_limit::DEFAULT_MAX_ATTEMPTS,
            timeout_seconds: 60,
        }
    }
}

impl ModelConfig {
    /// Registry key: identical configurations share one generator.
    pub fn registry_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.generator.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbConfig {
    pub db_type: String,
    /// Directory holding `<database>.db` files for file-based engines.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_executions_per_minute: Option<u32>,
    #[serde(default = "default_db_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_db_attempts")]
    pub max_attempts: u32,
}

fn default_db_concurrency() -> usize {
    10
}

fn default_db_attempts() -> u32 {
    crate::rate_limit::DEFAULT_MAX_ATTEMPTS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetupConfig {
    /// Scripts live under `<setup_directory>/<db_type>/`.
    pub setup_directory: PathBuf,
    /// One `<table>.csv` per table.
    #[serde(default)]
    pub data_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub path: PathBuf,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            path: PathBuf::from(".sqlbench/cache.db"),
            max_entries: 10_000,
        }
    }
}

/// Loads an experiment YAML. Unknown keys are reported; with `strict` they
/// are an error. Relative paths resolve against the config file's directory.
pub fn load_config(path: &Path, strict: bool) -> Result<ExperimentConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    let base = path.parent().unwrap_or(Path::new("."));
    parse_config(&raw, base, strict)
        .map_err(|ConfigError(msg)| ConfigError(format!("{} (file: {})", msg, path.display())))
}

pub fn parse_config(raw: &str, base: &Path, strict: bool) -> Result<ExperimentConfig, ConfigError> {
    let mut ignored = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);
    let mut cfg: ExperimentConfig = serde_ignored::deserialize(deserializer, |p| {
        ignored.insert(p.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let mut unknown: Vec<_> = ignored
        .into_iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    unknown.sort();
    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields in strict mode: {:?}",
                unknown
            )));
        }
        tracing::warn!(event = "config_unknown_fields", fields = ?unknown);
    }

    validate(&cfg)?;
    resolve_paths(&mut cfg, base);
    cfg.runners.apply_env();
    Ok(cfg)
}

fn validate(cfg: &ExperimentConfig) -> Result<(), ConfigError> {
    if cfg.query_types.is_empty() {
        return Err(ConfigError("query_types must not be empty".into()));
    }
    let r = &cfg.runners;
    if [
        r.eval_runners,
        r.promptgen_runners,
        r.sqlgen_runners,
        r.sqlexec_runners,
        r.scoring_runners,
    ]
    .contains(&0)
    {
        return Err(ConfigError("runner counts must be at least 1".into()));
    }
    for (dialect, db) in &cfg.db_configs {
        if db.db_type.trim().is_empty() {
            return Err(ConfigError(format!(
                "db_configs.{}: db_type must not be empty",
                dialect
            )));
        }
    }
    Ok(())
}

fn resolve_paths(cfg: &mut ExperimentConfig, base: &Path) {
    let join = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    };
    join(&mut cfg.dataset_config);
    for db in cfg.db_configs.values_mut() {
        if let Some(p) = db.database_path.as_mut() {
            join(p);
        }
    }
    if let Some(setup) = cfg.setup.as_mut() {
        join(&mut setup.setup_directory);
        if let Some(d) = setup.data_directory.as_mut() {
            join(d);
        }
    }
    join(&mut cfg.cache.path);
}

/// Scripts and table data that (re)build a database from scratch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupSpec {
    pub pre_setup: Vec<String>,
    pub setup: Vec<String>,
    pub post_setup: Vec<String>,
    /// Table name to CSV rows; the first row is the header.
    pub data: BTreeMap<String, Vec<Vec<String>>>,
}

impl SetupSpec {
    pub fn load(cfg: &SetupConfig, db_type: &str) -> anyhow::Result<Self> {
        let dir = cfg.setup_directory.join(db_type);
        let mut spec = SetupSpec {
            pre_setup: load_sql_file(&dir.join("pre_setup.sql"))?,
            setup: load_sql_file(&dir.join("setup.sql"))?,
            post_setup: load_sql_file(&dir.join("post_setup.sql"))?,
            data: BTreeMap::new(),
        };
        if let Some(data_dir) = &cfg.data_directory {
            spec.data = load_csv_tables(data_dir)?;
        }
        Ok(spec)
    }

    pub fn is_empty(&self) -> bool {
        self.pre_setup.is_empty() && self.setup.is_empty() && self.post_setup.is_empty()
    }

    /// Same scripts, no table data.
    pub fn without_data(&self) -> Self {
        Self {
            data: BTreeMap::new(),
            ..self.clone()
        }
    }
}

/// Missing files yield no commands.
fn load_sql_file(path: &Path) -> anyhow::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(split_sql_commands(&raw))
}

pub fn split_sql_commands(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_csv_tables(dir: &Path) -> anyhow::Result<BTreeMap<String, Vec<Vec<String>>>> {
    let mut tables = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(table) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        tables.insert(table.to_string(), rows);
    }
    Ok(tables)
}
