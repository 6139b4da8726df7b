use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type Job<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Fixed set of workers for one pipeline stage. Submitting waits while
/// every worker is busy and the queue is full.
pub struct WorkerPool<T> {
    stage: &'static str,
    jobs: mpsc::Sender<Job<T>>,
}

/// Outputs of a [`WorkerPool`] in completion order.
pub struct Completions<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn spawn(stage: &'static str, workers: usize) -> (Self, Completions<T>) {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job<T>>(workers);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                loop {
                    let job = job_rx.lock().await.recv().await;
                    let Some(job) = job else { break };
                    match tokio::spawn(job).await {
                        Ok(out) => {
                            if done_tx.send(out).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::error!(
                            event = "stage_job_failed",
                            stage,
                            worker,
                            error = %e
                        ),
                    }
                }
            });
        }

        (
            Self {
                stage,
                jobs: job_tx,
            },
            Completions { rx: done_rx },
        )
    }

    pub async fn submit<F>(&self, job: F) -> anyhow::Result<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.jobs
            .send(Box::pin(job))
            .await
            .map_err(|_| anyhow::anyhow!("{} workers have stopped", self.stage))
    }
}

impl<T> Completions<T> {
    /// `None` once the pool is dropped and every accepted job has finished.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn test_every_output_arrives_once() -> anyhow::Result<()> {
        let (pool, mut done) = WorkerPool::spawn("test", 3);
        let feeder = tokio::spawn(async move {
            for i in 0..20u64 {
                pool.submit(async move {
                    sleep(Duration::from_millis(20 - i)).await;
                    i
                })
                .await?;
            }
            anyhow::Ok(())
        });

        let mut seen = Vec::new();
        while let Some(i) = done.next().await {
            seen.push(i);
        }
        feeder.await??;

        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_workers() -> anyhow::Result<()> {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (pool, mut done) = WorkerPool::spawn("test", 2);

        let feeder = {
            let (running, peak) = (running.clone(), peak.clone());
            tokio::spawn(async move {
                for _ in 0..10 {
                    let (running, peak) = (running.clone(), peak.clone());
                    pool.submit(async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await?;
                }
                anyhow::Ok(())
            })
        };

        let mut n = 0;
        while done.next().await.is_some() {
            n += 1;
        }
        feeder.await??;
        assert_eq!(n, 10);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_the_pool() -> anyhow::Result<()> {
        let (pool, mut done) = WorkerPool::<u32>::spawn("test", 1);
        pool.submit(async {
            let missing: Option<u32> = None;
            missing.expect("boom")
        })
        .await?;
        pool.submit(async { 7u32 }).await?;
        drop(pool);

        assert_eq!(done.next().await, Some(7));
        assert_eq!(done.next().await, None);
        Ok(())
    }
}
