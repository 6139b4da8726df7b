use super::backend::CacheBackend;
use super::key::cache_key;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Memoizes expensive calls (query execution, model ratings) behind a
/// [`CacheBackend`]. Cache trouble never fails the call: it is logged and
/// the wrapped function runs directly.
#[derive(Clone)]
pub struct CacheGateway {
    backend: Arc<dyn CacheBackend>,
}

impl CacheGateway {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub async fn run_cached<T, F, Fut>(
        &self,
        namespace: &str,
        parts: &[&str],
        f: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let key = cache_key(namespace, parts);

        match self.backend.get(&key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(v) => {
                    tracing::trace!(event = "cache_hit", namespace, key = %key);
                    return Ok(v);
                }
                Err(e) => tracing::warn!(
                    event = "cache_decode_failed",
                    namespace,
                    key = %key,
                    error = %e,
                    "ignoring unreadable cache entry"
                ),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(
                event = "cache_read_failed",
                namespace,
                error = %e,
                "cache unavailable, running uncached"
            ),
        }

        let value = f().await?;

        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                if let Err(e) = self.backend.set(&key, &bytes) {
                    tracing::warn!(event = "cache_write_failed", namespace, error = %e);
                }
            }
            Err(e) => tracing::warn!(event = "cache_encode_failed", namespace, error = %e),
        }

        Ok(value)
    }
}
