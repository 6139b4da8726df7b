use async_trait::async_trait;

pub mod models;
pub mod prompts;
pub mod registry;

pub use models::{build_model, NoopGenerator, OpenAiGenerator};
pub use prompts::{build_prompt_generator, NoopPromptGenerator, SchemaPromptGenerator};
pub use registry::ModelRegistry;

/// Turns a natural-language question into the prompt sent to a model.
#[async_trait]
pub trait PromptGenerator: Send + Sync {
    /// Called before each partition is evaluated.
    async fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn generate(&self, nl_prompt: &str) -> anyhow::Result<String>;
}

/// Produces SQL for a prompt.
#[async_trait]
pub trait ModelGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;

    /// Pass-through generators replay SQL stored with the case instead of
    /// being called.
    fn is_passthrough(&self) -> bool {
        false
    }
}
