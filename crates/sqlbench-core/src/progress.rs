use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub setup: usize,
    pub prompt: usize,
    pub gen: usize,
    pub exec: usize,
    pub score: usize,
    pub total_items: usize,
    pub total_partitions: usize,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.score >= self.total_items && self.setup >= self.total_partitions
    }
}

/// Shared counters for a run. Counters only grow; totals only shrink, when
/// work is abandoned.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(total_items: usize, total_partitions: usize) -> Self {
        Self {
            state: Mutex::new(ProgressSnapshot {
                total_items,
                total_partitions,
                ..Default::default()
            }),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut s);
    }

    pub fn set_totals(&self, total_items: usize, total_partitions: usize) {
        self.update(|s| {
            s.total_items = total_items;
            s.total_partitions = total_partitions;
        });
    }

    pub fn record_setup(&self) {
        self.update(|s| s.setup += 1);
    }

    pub fn record_prompt(&self) {
        self.update(|s| s.prompt += 1);
    }

    pub fn record_gen(&self) {
        self.update(|s| s.gen += 1);
    }

    pub fn record_exec(&self) {
        self.update(|s| s.exec += 1);
    }

    pub fn record_score(&self) {
        self.update(|s| s.score += 1);
    }

    /// Abandons `partitions` partitions holding `items` items.
    pub fn skip(&self, items: usize, partitions: usize) {
        self.update(|s| {
            s.total_items = s.total_items.saturating_sub(items);
            s.total_partitions = s.total_partitions.saturating_sub(partitions);
        });
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub const STAGES: [&str; 5] = ["DBs Setup", "Prompts", "SQLGen", "SQLExec", "Scoring"];

impl ProgressSnapshot {
    /// `(label, done, total)` per stage, in pipeline order.
    pub fn stages(&self) -> [(&'static str, usize, usize); 5] {
        [
            (STAGES[0], self.setup, self.total_partitions),
            (STAGES[1], self.prompt, self.total_items),
            (STAGES[2], self.gen, self.total_items),
            (STAGES[3], self.exec, self.total_items),
            (STAGES[4], self.score, self.total_items),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let p = Arc::new(ProgressTracker::new(800, 4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = p.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        p.record_exec();
                        p.record_score();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = p.snapshot();
        assert_eq!(s.exec, 800);
        assert_eq!(s.score, 800);
    }

    #[test]
    fn test_skip_shrinks_totals() {
        let p = ProgressTracker::new(10, 3);
        p.skip(4, 1);
        p.skip(100, 100);
        let s = p.snapshot();
        assert_eq!((s.total_items, s.total_partitions), (0, 0));
        assert!(s.is_complete());
    }

    #[test]
    fn test_stages_pair_counters_with_their_totals() {
        let s = ProgressSnapshot {
            setup: 1,
            prompt: 2,
            total_items: 4,
            total_partitions: 2,
            ..Default::default()
        };
        let stages = s.stages();
        assert_eq!(stages[0], ("DBs Setup", 1, 2));
        assert_eq!(stages[1], ("Prompts", 2, 4));
        assert_eq!(stages[4], ("Scoring", 0, 4));
    }
}
