use async_trait::async_trait;
use sqlbench_core::cache::CacheGateway;
use sqlbench_core::generators::ModelGenerator;
use sqlbench_core::metrics_api::{Comparator, ComparatorOutput, Comparison};
use sqlbench_core::model::Row;
use std::sync::Arc;

/// Rows of each side shown to the model.
const ONLY_FIRST_N: usize = 50;

const RUBRIC: &str = r#"We are trying to answer this question by querying a database:

QUESTION: {QUESTION}

The correct answer to this question is:

OUTPUT #1:

{GOLDEN}

We get the following answer from a second query.

OUTPUT #2

{GENERATED}

Thinking step by step, compare the two outputs and look for differences in data presentation.
Here are steps to follow:

1) Map all columns in OUTPUT #1 to the same columns in OUTPUT #2. Their names might be different
   so long as the content represents the same data.
2) If all columns in OUTPUT #1 do not map to OUTPUT #2 then information is missing.
3) Compare the data in the mapped columns between OUTPUT #1 and OUTPUT #2. The data should be an
   exact match, there should be no extra or missing data in OUTPUT #2

Rules:
1) Always assume that OUTPUT #1 is correct.
2) Only compare the result sets, don't make other assumptions.
3) OUTPUT #2 can be correct even if the order of columns is different
4) Adding additional information, like more columns is not a problem as long as they are relevant.
   Numbers, dates, timestamps, measurements or metrics MUST be the same between the two outputs.
5) It's ok to concatenate or change strings in minor ways (for example, combining first name
   and last name)

FINAL QUESTION: Does OUTPUT #2 provide the same information as OUTPUT #1?
FINAL ANSWER:
- INFORMATION_MATCHES -- OUTPUT #1 and OUTPUT #2 provide the same information.
- MISSING_INFORMATION -- Something important is missing from OUTPUT #2.
- EXTRA_INFORMATION -- Some non-harmful extra relevant columns were added to OUTPUT #2.
- INCORRECT_INFORMATION -- Some incorrect information was added to OUTPUT #2, likely due to an
  incorrect filter or incorrect aggregation.
"#;

/// Asks a model whether the generated rows carry the golden rows'
/// information. Verdicts are cached by prompt.
pub struct LlmRater {
    model: Arc<dyn ModelGenerator>,
    cache: Option<CacheGateway>,
}

impl LlmRater {
    pub fn new(model: Arc<dyn ModelGenerator>, cache: Option<CacheGateway>) -> Self {
        Self { model, cache }
    }

    fn prompt(c: &Comparison<'_>) -> anyhow::Result<String> {
        Ok(RUBRIC
            .replace("{QUESTION}", c.nl_prompt)
            .replace("{GOLDEN}", &head(c.golden_rows)?)
            .replace("{GENERATED}", &head(c.generated_rows)?))
    }
}

fn head(rows: Option<&[Row]>) -> anyhow::Result<String> {
    let rows = rows.unwrap_or_default();
    Ok(serde_json::to_string(&rows[..rows.len().min(ONLY_FIRST_N)])?)
}

#[async_trait]
impl Comparator for LlmRater {
    fn name(&self) -> &'static str {
        "llmrater"
    }

    async fn compare(&self, c: &Comparison<'_>) -> anyhow::Result<ComparatorOutput> {
        let (Some(golden), Some(generated)) = (c.golden_rows, c.generated_rows) else {
            return Ok(ComparatorOutput::with_logs(
                0.0,
                "No execution result; model not consulted.",
            ));
        };
        if !c.has_error() && golden == generated {
            return Ok(ComparatorOutput::with_logs(100.0, "Exact match; model not consulted."));
        }

        let prompt = Self::prompt(c)?;
        tracing::debug!(event = "llm_rater_prompt", chars = prompt.len());
        let verdict: String = match &self.cache {
            Some(cache) => {
                let material = [self.model.name(), prompt.as_str()];
                cache
                    .run_cached("llmrater", &material, || self.model.generate(&prompt))
                    .await?
            }
            None => self.model.generate(&prompt).await?,
        };

        let score = if verdict.contains("INFORMATION_MATCHES")
            || verdict.contains("EXTRA_INFORMATION")
        {
            100.0
        } else {
            0.0
        };
        Ok(ComparatorOutput::with_logs(score, verdict))
    }
}
