//! Periodic transfer progress logging

use indicatif::{HumanBytes, HumanDuration};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Byte counter logged every [`REPORT_INTERVAL`] until dropped
pub struct Progress {
    transferred: Arc<AtomicU64>,
    reporter: JoinHandle<()>,
}

impl Progress {
    pub fn start(total: u64) -> Self {
        Self::with_interval(total, REPORT_INTERVAL)
    }

    pub fn with_interval(total: u64, every: Duration) -> Self {
        let transferred = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&transferred);
        let started = Instant::now();

        let reporter = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let done = counter.load(Ordering::Relaxed);
                let elapsed = started.elapsed();
                let rate = done as f64 / elapsed.as_secs_f64().max(1.0);
                tracing::info!(
                    "Transferred {} / {}, {}/s, {} elapsed",
                    HumanBytes(done),
                    HumanBytes(total),
                    HumanBytes(rate as u64),
                    HumanDuration(elapsed)
                );
            }
        });

        Self {
            transferred,
            reporter,
        }
    }

    pub fn record(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.reporter.abort();
    }
}
