use super::{build_model, ModelGenerator};
use crate::config::ModelConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Process-wide model instances, one per distinct configuration, so every
/// database evaluated concurrently shares the model's rate limiter.
#[derive(Default)]
pub struct ModelRegistry {
    models: Mutex<HashMap<String, Arc<dyn ModelGenerator>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, cfg: &ModelConfig) -> anyhow::Result<Arc<dyn ModelGenerator>> {
        let key = cfg.registry_key();
        let mut models = self
            .models
            .lock()
            .map_err(|_| anyhow::anyhow!("model registry lock poisoned"))?;
        if let Some(m) = models.get(&key) {
            return Ok(m.clone());
        }
        let m = build_model(cfg)?;
        tracing::debug!(event = "model_registered", generator = %cfg.generator, name = %m.name());
        models.insert(key, m.clone());
        Ok(m)
    }

    /// Registers a prebuilt model under `cfg`; later lookups return it.
    pub fn insert(&self, cfg: &ModelConfig, model: Arc<dyn ModelGenerator>) -> anyhow::Result<()> {
        self.models
            .lock()
            .map_err(|_| anyhow::anyhow!("model registry lock poisoned"))?
            .insert(cfg.registry_key(), model);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.models.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
