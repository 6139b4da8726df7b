use super::PromptGenerator;
use crate::config::PromptGeneratorKind;
use crate::db::Database;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

const SCHEMA_TEMPLATE: &str = "You are a {DIALECT} SQL expert.

The database has the following tables:

**************************
{SCHEMA}
**************************

Write one {DIALECT} query that answers the question below.
- Output only the query, wrapped in a ```sql block.
- Use only tables and columns listed above.
- Follow {DIALECT} syntax, types and built-in functions.

Question:
{USER_PROMPT}
";

/// Uses the question verbatim.
pub struct NoopPromptGenerator;

#[async_trait]
impl PromptGenerator for NoopPromptGenerator {
    async fn generate(&self, nl_prompt: &str) -> anyhow::Result<String> {
        Ok(nl_prompt.to_string())
    }
}

/// Embeds the live schema of the core database in a dialect template.
pub struct SchemaPromptGenerator {
    db: Arc<dyn Database>,
    dialect: String,
    schema: OnceCell<String>,
}

impl SchemaPromptGenerator {
    pub fn new(db: Arc<dyn Database>, dialect: &str) -> Self {
        Self {
            db,
            dialect: dialect.to_string(),
            schema: OnceCell::new(),
        }
    }
}

fn dialect_label(dialect: &str) -> &str {
    match dialect.to_ascii_lowercase().as_str() {
        "sqlite" => "SQLite",
        "postgres" | "postgresql" => "PostgreSQL",
        "mysql" => "MySQL",
        "sqlserver" | "mssql" => "SQL Server",
        "bigquery" => "BigQuery",
        _ => dialect,
    }
}

#[async_trait]
impl PromptGenerator for SchemaPromptGenerator {
    async fn setup(&self) -> anyhow::Result<()> {
        self.schema
            .get_or_try_init(|| async {
                Ok::<_, anyhow::Error>(self.db.get_metadata().await?.to_ddl())
            })
            .await?;
        Ok(())
    }

    async fn generate(&self, nl_prompt: &str) -> anyhow::Result<String> {
        let schema = self
            .schema
            .get()
            .ok_or_else(|| anyhow::anyhow!("schema prompt generator used before setup"))?;
        Ok(SCHEMA_TEMPLATE
            .replace("{DIALECT}", dialect_label(&self.dialect))
            .replace("{SCHEMA}", schema)
            .replace("{USER_PROMPT}", nl_prompt))
    }
}

pub fn build_prompt_generator(
    kind: PromptGeneratorKind,
    core: Arc<dyn Database>,
    dialect: &str,
) -> Arc<dyn PromptGenerator> {
    match kind {
        PromptGeneratorKind::Noop => Arc::new(NoopPromptGenerator),
        PromptGeneratorKind::Schema => Arc::new(SchemaPromptGenerator::new(core, dialect)),
    }
}
