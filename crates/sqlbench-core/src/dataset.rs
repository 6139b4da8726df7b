use crate::config::ExperimentConfig;
use crate::model::{EvalCase, QueryType};
use std::collections::BTreeMap;
use std::path::Path;

/// dialect -> database -> query type -> cases, each case specialised to
/// its dialect.
pub type Partitions = BTreeMap<String, BTreeMap<String, BTreeMap<QueryType, Vec<EvalCase>>>>;

#[derive(Debug, Default)]
pub struct PartitionedDataset {
    pub partitions: Partitions,
    pub total_items: usize,
    pub total_partitions: usize,
}

impl PartitionedDataset {
    pub fn database_count(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }
}

pub fn load_dataset(path: &Path, cfg: &ExperimentConfig) -> anyhow::Result<Vec<EvalCase>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read dataset {}: {}", path.display(), e))?;
    let all: Vec<EvalCase> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse dataset {}: {}", path.display(), e))?;
    let loaded = all.len();
    let cases = filter_cases(all, cfg);
    tracing::info!(
        event = "dataset_loaded",
        path = %path.display(),
        loaded,
        kept = cases.len()
    );
    Ok(cases)
}

/// Applies the config's query-type, database and dialect filters. Dialects
/// are intersected with the configured set; cases left with no dialect drop.
pub fn filter_cases(cases: Vec<EvalCase>, cfg: &ExperimentConfig) -> Vec<EvalCase> {
    cases
        .into_iter()
        .filter(|c| cfg.query_types.contains(&c.query_type))
        .filter(|c| cfg.databases.is_empty() || cfg.databases.contains(&c.database))
        .filter_map(|mut c| {
            if !cfg.dialects.is_empty() {
                c.dialects.retain(|d| cfg.dialects.contains(d));
            }
            (!c.dialects.is_empty()).then_some(c)
        })
        .collect()
}

/// Splits cases into partitions. A case listing several dialects lands in
/// each, as an independent copy.
pub fn partition(cases: &[EvalCase]) -> PartitionedDataset {
    let mut out = PartitionedDataset::default();
    for case in cases {
        for dialect in &case.dialects {
            out.partitions
                .entry(dialect.clone())
                .or_default()
                .entry(case.database.clone())
                .or_default()
                .entry(case.query_type)
                .or_default()
                .push(case.for_dialect(dialect));
            out.total_items += 1;
        }
    }
    out.total_partitions = out
        .partitions
        .values()
        .flat_map(BTreeMap::values)
        .map(BTreeMap::len)
        .sum();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use serde_json::json;

    fn cases() -> Vec<EvalCase> {
        serde_json::from_value(json!([
            {"id": "1", "query_type": "dql", "database": "shop", "dialects": ["sqlite", "postgres"],
             "nl_prompt": "a", "golden_sql": {"sqlite": ["SELECT 1"], "postgres": ["SELECT 1"]}},
            {"id": "2", "query_type": "DML", "database": "shop", "dialects": ["sqlite"],
             "nl_prompt": "b", "golden_sql": {"sqlite": ["DELETE FROM t"]}},
            {"id": "3", "query_type": "ddl", "database": "crm", "dialects": ["mysql"],
             "nl_prompt": "c", "golden_sql": {"mysql": ["CREATE TABLE x (a int)"]}}
        ]))
        .unwrap()
    }

    #[test]
    fn test_partition_counts() {
        let p = partition(&cases());
        assert_eq!(p.total_items, 4);
        // sqlite/shop/{dql,dml}, postgres/shop/dql, mysql/crm/ddl
        assert_eq!(p.total_partitions, 4);
        assert_eq!(p.database_count(), 3);
        let pg = &p.partitions["postgres"]["shop"][&QueryType::Dql][0];
        assert_eq!(pg.dialects, vec!["postgres".to_string()]);
        assert!(!pg.golden_sql.contains_key("sqlite"));
    }

    #[test]
    fn test_filters_intersect_dialects() {
        let cfg = parse_config(
            "dataset_config: x.json\ndialects: [sqlite]\nquery_types: [dql, ddl]\n",
            Path::new("."),
            false,
        )
        .unwrap();
        let kept = filter_cases(cases(), &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "1");
        assert_eq!(kept[0].dialects, vec!["sqlite".to_string()]);
    }

    #[test]
    fn test_database_filter() {
        let cfg = parse_config(
            "dataset_config: x.json\ndatabases: [crm]\n",
            Path::new("."),
            false,
        )
        .unwrap();
        let kept = filter_cases(cases(), &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].database, "crm");
    }
}
