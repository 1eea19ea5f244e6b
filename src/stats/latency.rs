//! Rolling latency statistics
//!
//! Means are updated incrementally (`mean' = mean + (sample - mean) / (n + 1)`)
//! so no sample history is kept.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Incremental mean plus the most recent sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RollingMean {
    mean: f64,
    recent: f64,
    count: u64,
}

impl RollingMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one sample
    pub fn update(&mut self, sample: f64) {
        self.recent = sample;
        self.mean += (sample - self.mean) / (self.count + 1) as f64;
        self.count += 1;
    }

    /// Fold in a duration, in seconds
    pub fn update_duration(&mut self, sample: Duration) {
        self.update(sample.as_secs_f64());
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn recent(&self) -> f64 {
        self.recent
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Per-worker round-trip timings
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerLatency {
    /// Time to write the frame
    pub send: RollingMean,
    /// Time from end of send to a complete result set
    pub await_result: RollingMean,
    /// Round trips completed
    pub completed: u64,
}

/// One worker's line in a report
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub slot: usize,
    pub send_mean_ms: f64,
    pub send_recent_ms: f64,
    pub await_mean_ms: f64,
    pub await_recent_ms: f64,
    pub completed: u64,
    /// Percentage of all completed frames handled by this worker
    pub share: f64,
}

/// Latency tracking across all worker slots
#[derive(Debug)]
pub struct LatencyTracker {
    workers: BTreeMap<usize, WorkerLatency>,
    total_completed: u64,
    started_at: Instant,
    last_report: Option<Instant>,
    report_interval: Duration,
}

impl LatencyTracker {
    /// Create a tracker reporting at most once per `report_interval`
    pub fn new(report_interval: Duration) -> Self {
        Self {
            workers: BTreeMap::new(),
            total_completed: 0,
            started_at: Instant::now(),
            last_report: None,
            report_interval,
        }
    }

    /// Record how long sending a frame to `slot` took
    pub fn record_send(&mut self, slot: usize, elapsed: Duration) {
        self.workers
            .entry(slot)
            .or_default()
            .send
            .update_duration(elapsed);
    }

    /// Record how long `slot` took to return its result; counts a completion
    pub fn record_await(&mut self, slot: usize, elapsed: Duration) {
        let worker = self.workers.entry(slot).or_default();
        worker.await_result.update_duration(elapsed);
        worker.completed += 1;
        self.total_completed += 1;
    }

    /// Stats for one slot
    pub fn worker(&self, slot: usize) -> Option<&WorkerLatency> {
        self.workers.get(&slot)
    }

    /// Total completed round trips across all slots
    pub fn total_completed(&self) -> u64 {
        self.total_completed
    }

    /// Time since the tracker was created
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Aggregate completed frames per second of wall time
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.total_completed as f64 / secs
        } else {
            0.0
        }
    }

    /// Percentage of completed frames handled by `slot`
    pub fn share(&self, slot: usize) -> f64 {
        if self.total_completed == 0 {
            return 0.0;
        }
        let completed = self.workers.get(&slot).map_or(0, |w| w.completed);
        completed as f64 * 100.0 / self.total_completed as f64
    }

    /// Per-worker report lines, ordered by slot
    pub fn snapshot(&self) -> Vec<WorkerReport> {
        self.workers
            .iter()
            .map(|(&slot, w)| WorkerReport {
                slot,
                send_mean_ms: w.send.mean() * 1000.0,
                send_recent_ms: w.send.recent() * 1000.0,
                await_mean_ms: w.await_result.mean() * 1000.0,
                await_recent_ms: w.await_result.recent() * 1000.0,
                completed: w.completed,
                share: self.share(slot),
            })
            .collect()
    }

    /// Log a report if the report interval has elapsed since the last one
    ///
    /// Returns whether a report was emitted.
    pub fn report(&mut self) -> bool {
        let due = self
            .last_report
            .map_or(true, |last| last.elapsed() >= self.report_interval);

        if due {
            self.force_report();
        }
        due
    }

    /// Log a report unconditionally (used at session end)
    pub fn force_report(&mut self) {
        self.last_report = Some(Instant::now());

        tracing::info!(
            frames = self.total_completed,
            elapsed_secs = self.elapsed().as_secs_f64(),
            fps = self.fps(),
            "Throughput"
        );
        for line in self.snapshot() {
            tracing::info!(
                slot = line.slot,
                send_ms = line.send_mean_ms,
                send_recent_ms = line.send_recent_ms,
                await_ms = line.await_mean_ms,
                await_recent_ms = line.await_recent_ms,
                completed = line.completed,
                share_pct = line.share,
                "Worker latency"
            );
        }
    }
}
