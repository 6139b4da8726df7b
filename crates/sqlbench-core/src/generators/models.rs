use super::ModelGenerator;
use crate::config::ModelConfig;
use crate::errors::{ConfigError, ResourceExhausted};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Never called; SQL comes from the dataset.
pub struct NoopGenerator;

#[async_trait]
impl ModelGenerator for NoopGenerator {
    fn name(&self) -> &str {
        "noop"
    }

    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}

pub struct OpenAiGenerator {
    model: String,
    api_key: String,
    base_url: String,
    base_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl OpenAiGenerator {
    pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Self> {
        let model = cfg
            .model
            .clone()
            .ok_or_else(|| ConfigError("model.model is required for the openai generator".into()))?;
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            ConfigError(format!(
                "environment variable {} is not set",
                cfg.api_key_env
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self {
            model,
            api_key,
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            base_prompt: cfg.base_prompt.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            client,
            limiter: RateLimiter::new(cfg.calls_per_minute, cfg.max_concurrency, cfg.max_attempts),
        })
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut messages = Vec::new();
        if let Some(system) = &self.base_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 || status.as_u16() == 503 {
            let text = resp.text().await.unwrap_or_default();
            return Err(ResourceExhausted::new(format!("{}: {}", status, text)).into());
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completions error {}: {}", status, text);
        }

        let v: serde_json::Value = resp.json().await?;
        let text = v
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("chat completions response missing content"))?;
        Ok(text.to_string())
    }
}

#[async_trait]
impl ModelGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.limiter.run(|| self.complete(prompt)).await
    }
}

pub fn build_model(cfg: &ModelConfig) -> anyhow::Result<std::sync::Arc<dyn ModelGenerator>> {
    match cfg.generator.as_str() {
        "noop" => Ok(std::sync::Arc::new(NoopGenerator)),
        "openai" => Ok(std::sync::Arc::new(OpenAiGenerator::from_config(cfg)?)),
        other => Err(ConfigError(format!("unknown model generator '{}'", other)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::is_config_error;

    #[test]
    fn test_unknown_generator_is_config_error() {
        let cfg = ModelConfig {
            generator: "gemini".into(),
            ..Default::default()
        };
        let err = build_model(&cfg).err().unwrap();
        assert!(is_config_error(&err));
    }

    #[test]
    fn test_openai_requires_model_name() {
        let cfg = ModelConfig {
            generator: "openai".into(),
            ..Default::default()
        };
        let err = build_model(&cfg).err().unwrap();
        assert!(err.to_string().contains("model.model"));
    }

    #[test]
    fn test_noop_is_passthrough() -> anyhow::Result<()> {
        let m = build_model(&ModelConfig::default())?;
        assert!(m.is_passthrough());
        assert_eq!(m.name(), "noop");
        Ok(())
    }
}
