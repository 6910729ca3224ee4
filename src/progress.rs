//! Run progress shared between fetch tasks and the scheduler loop.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::config::PROGRESS_LOG_EVERY;
use crate::types::TaskOutcome;

#[derive(Debug, Default)]
pub struct Progress {
    total: AtomicU64,
    completed: AtomicU64,
    delivered: AtomicU64,
    empty: AtomicU64,
    exhausted: AtomicU64,
    decode_failed: AtomicU64,
    cancelled: AtomicU64,
    /// Ticks across all delivered days.
    rows: AtomicU64,
}

/// Plain copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: u64,
    pub completed: u64,
    pub delivered: u64,
    pub empty: u64,
    pub exhausted: u64,
    pub decode_failed: u64,
    pub cancelled: u64,
    pub rows: u64,
}

impl RunSummary {
    pub fn failures(&self) -> u64 {
        self.exhausted + self.decode_failed
    }
}

impl Progress {
    pub fn new(total: u64) -> Self {
        let p = Self::default();
        p.total.store(total, Ordering::Relaxed);
        p
    }

    pub fn record(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Delivered(table) => {
                self.rows.fetch_add(table.len() as u64, Ordering::Relaxed);
                &self.delivered
            }
            TaskOutcome::Empty => &self.empty,
            TaskOutcome::Exhausted { .. } => &self.exhausted,
            TaskOutcome::DecodeFailed(_) => &self.decode_failed,
            TaskOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        if done % PROGRESS_LOG_EVERY == 0 || done == total {
            let pct = if total == 0 { 100.0 } else { done as f64 * 100.0 / total as f64 };
            info!(
                completed = done,
                total,
                failed = self.exhausted.load(Ordering::Relaxed) + self.decode_failed.load(Ordering::Relaxed),
                "Progress {done}/{total} ({pct:.1}%)",
            );
        }
    }

    pub fn snapshot(&self) -> RunSummary {
        RunSummary {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            decode_failed: self.decode_failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
        }
    }
}
