//! A process-wide operation counter, sampled once a second into a rate the
//! `INFO` command reports. Deliberately just two atomics and a background
//! task rather than a metrics crate: there's exactly one gauge to expose.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct OpCounter {
    total: AtomicU64,
    last_rate: AtomicU64,
}

impl OpCounter {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            last_rate: AtomicU64::new(0),
        }
    }

    pub fn record(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_rate(&self) -> u64 {
        self.last_rate.load(Ordering::Relaxed)
    }

    /// Swaps the running total out for zero every tick, publishing the
    /// delta (== ops in the last second) as the new rate.
    fn sample(&self) {
        let count = self.total.swap(0, Ordering::Relaxed);
        self.last_rate.store(count, Ordering::Relaxed);
    }
}

impl Default for OpCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the 1 Hz sampling task and returns its handle. Dropping the
/// handle only detaches it — the task keeps running until the process
/// exits or the caller calls `.abort()` on it.
pub fn spawn_sampler(counter: Arc<OpCounter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            counter.sample();
        }
    })
}
