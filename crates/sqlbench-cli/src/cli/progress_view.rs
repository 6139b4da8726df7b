use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use sqlbench_core::progress::{ProgressSnapshot, ProgressTracker, STAGES};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const TEMPLATE: &str = "{prefix:<10} [{bar:50.green}] {percent:>3}% ({pos}/{len}) {msg}";

/// One bar per pipeline stage, kept in step with a [`ProgressTracker`].
#[derive(Clone)]
pub struct StageBars {
    bars: Vec<ProgressBar>,
}

impl StageBars {
    pub fn new(multi: &MultiProgress) -> anyhow::Result<Self> {
        let style = ProgressStyle::with_template(TEMPLATE)?.progress_chars("█▉-");
        let bars = STAGES
            .iter()
            .map(|label| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(style.clone());
                bar.set_prefix(*label);
                bar
            })
            .collect();
        Ok(Self { bars })
    }

    pub fn update(&self, snapshot: &ProgressSnapshot) {
        for (bar, (_, done, total)) in self.bars.iter().zip(snapshot.stages()) {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        }
    }

    fn finish(&self, snapshot: &ProgressSnapshot) {
        self.update(snapshot);
        for bar in &self.bars {
            bar.finish_with_message("Complete");
        }
    }

    fn abandon(&self) {
        for bar in &self.bars {
            bar.abandon();
        }
    }
}

/// Refreshes the stage bars from tracker snapshots until finished.
pub struct ProgressView {
    bars: StageBars,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressView {
    pub fn start(
        tracker: Arc<ProgressTracker>,
        multi: &MultiProgress,
        every: Duration,
    ) -> anyhow::Result<Self> {
        let bars = StageBars::new(multi)?;
        let (stop, mut stopped) = oneshot::channel();
        let view_bars = bars.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = tick.tick() => bars.update(&tracker.snapshot()),
                    _ = &mut stopped => break,
                }
            }
            bars.finish(&tracker.snapshot());
        });
        Ok(Self {
            bars: view_bars,
            stop,
            handle,
        })
    }

    pub async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            self.bars.abandon();
            tracing::warn!(event = "progress_view_failed", error = %e);
        }
    }
}
