use crate::errors::{is_resource_exhausted, ResourceExhausted};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug)]
struct Throttle {
    calls_per_minute: u32,
    slots: Arc<Semaphore>,
    max_attempts: u32,
    backoff_base: Duration,
}

/// Bounds concurrency and call rate of an external resource and retries
/// transient exhaustion with exponential backoff.
///
/// Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    throttle: Option<Arc<Throttle>>,
}

impl RateLimiter {
    /// `calls_per_minute` of `None` or `0` yields a pass-through limiter.
    pub fn new(calls_per_minute: Option<u32>, max_concurrency: usize, max_attempts: u32) -> Self {
        let throttle = match calls_per_minute {
            Some(cpm) if cpm > 0 => Some(Arc::new(Throttle {
                calls_per_minute: cpm,
                slots: Arc::new(Semaphore::new(max_concurrency.max(1))),
                max_attempts: max_attempts.max(1),
                backoff_base: DEFAULT_BACKOFF_BASE,
            })),
            _ => None,
        };
        Self { throttle }
    }

    pub fn unlimited() -> Self {
        Self { throttle: None }
    }

    pub fn with_backoff_base(self, base: Duration) -> Self {
        let throttle = self.throttle.map(|t| {
            Arc::new(Throttle {
                calls_per_minute: t.calls_per_minute,
                slots: t.slots.clone(),
                max_attempts: t.max_attempts,
                backoff_base: base,
            })
        });
        Self { throttle }
    }

    pub fn is_unlimited(&self) -> bool {
        self.throttle.is_none()
    }

    /// Runs `f` under one slot. `ResourceExhausted` errors are retried after
    /// `backoff_base * 2^attempt`; other errors return immediately. The slot
    /// is held for an extra `60 / calls_per_minute` seconds after the call.
    pub async fn run<T, F, Fut>(&self, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let Some(t) = &self.throttle else {
            return f().await;
        };

        let _slot = t.slots.clone().acquire_owned().await?;

        let mut outcome = None;
        let mut last_detail = String::new();
        for attempt in 1..=t.max_attempts {
            match f().await {
                Ok(v) => {
                    outcome = Some(Ok(v));
                    break;
                }
                Err(e) if is_resource_exhausted(&e) => {
                    last_detail = e.to_string();
                    tracing::debug!(
                        event = "resource_exhausted",
                        attempt,
                        max_attempts = t.max_attempts,
                        error = %e
                    );
                    if attempt < t.max_attempts {
                        sleep(t.backoff_base * 2u32.pow(attempt)).await;
                    }
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    break;
                }
            }
        }

        sleep(Duration::from_secs_f64(60.0 / t.calls_per_minute as f64)).await;

        outcome.unwrap_or_else(|| {
            Err(ResourceExhausted {
                detail: last_detail,
                attempts: t.max_attempts,
            }
            .into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_single_slot_spaces_calls() -> anyhow::Result<()> {
        let limiter = RateLimiter::new(Some(60), 1, 3);
        let start = Instant::now();

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.run(|| async move { Ok(i) }).await }));
        }
        for h in handles {
            h.await??;
        }

        // 5 calls, 1s hold each, single slot
        assert!(start.elapsed() >= Duration::from_secs(4));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_exhausted_uses_every_attempt() {
        let limiter =
            RateLimiter::new(Some(600), 2, 4).with_backoff_base(Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let res: anyhow::Result<()> = limiter
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ResourceExhausted::new("database is locked").into()) }
            })
            .await;

        let err = res.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let exhausted = err.downcast_ref::<ResourceExhausted>().unwrap();
        assert_eq!(exhausted.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let limiter = RateLimiter::new(Some(600), 1, 5);
        let calls = AtomicU32::new(0);

        let res: anyhow::Result<()> = limiter
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("no such table: orders")) }
            })
            .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() -> anyhow::Result<()> {
        let limiter = RateLimiter::new(Some(60), 1, 3);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let v = limiter
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ResourceExhausted::new("busy").into())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await?;

        assert_eq!(v, 1);
        // 10s backoff after attempt 1, then the 1s hold
        assert!(start.elapsed() >= Duration::from_secs(11));
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_rate_is_passthrough() -> anyhow::Result<()> {
        let limiter = RateLimiter::new(Some(0), 1, 3);
        assert!(limiter.is_unlimited());
        assert_eq!(limiter.run(|| async { Ok(7) }).await?, 7);
        assert!(RateLimiter::new(None, 1, 3).is_unlimited());
        Ok(())
    }
}
