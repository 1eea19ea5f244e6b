//! Worker-side per-stage timing
//!
//! Each stage keeps two rolling means: wall time and process CPU time. CPU
//! time comes from `/proc/self/stat` and is counted in clock ticks, so it is
//! only available on Linux and has tick resolution. Elsewhere the CPU means
//! stay at zero.

use std::time::{Duration, Instant};

use super::latency::RollingMean;

/// Processing stage on a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Decode/resize/normalize before the model runs
    Preprocess,
    /// Model execution
    Infer,
    /// Turning raw output into detections and sending them
    Postprocess,
}

impl Stage {
    fn index(self) -> usize {
        match self {
            Stage::Preprocess => 0,
            Stage::Infer => 1,
            Stage::Postprocess => 2,
        }
    }
}

/// Kernel clock ticks per second as exposed to userspace (`USER_HZ`)
const CLOCK_TICKS_PER_SEC: u64 = 100;

/// User plus system CPU time from a `/proc/<pid>/stat` line
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`. utime and stime are fields 14 and 15.
fn parse_stat_cpu(stat: &str) -> Option<Duration> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace().skip(11);
    let utime: u64 = fields.next()?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;

    let ticks = utime + stime;
    Some(Duration::from_millis(ticks * 1000 / CLOCK_TICKS_PER_SEC))
}

/// CPU time consumed by this process so far
fn process_cpu_time() -> Option<Duration> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    parse_stat_cpu(&stat)
}

/// Rolling wall-clock and CPU means for each worker stage
///
/// `start` marks the beginning of a stage and `stop` records it. A frame is
/// counted when its postprocess stage stops.
#[derive(Debug)]
pub struct StageStopwatch {
    stages: [RollingMean; 3],
    cpu: [RollingMean; 3],
    started: Option<Instant>,
    started_cpu: Option<Duration>,
    frames: u64,
    last_report: Option<Instant>,
    report_interval: Duration,
}

impl StageStopwatch {
    pub fn new(report_interval: Duration) -> Self {
        Self {
            stages: [RollingMean::new(); 3],
            cpu: [RollingMean::new(); 3],
            started: None,
            started_cpu: None,
            frames: 0,
            last_report: None,
            report_interval,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.started_cpu = process_cpu_time();
    }

    /// Record the time since `start` against `stage`
    pub fn stop(&mut self, stage: Stage) -> Duration {
        let elapsed = self.started.map_or(Duration::ZERO, |s| s.elapsed());
        self.stages[stage.index()].update_duration(elapsed);

        let cpu = match (self.started_cpu, process_cpu_time()) {
            (Some(start), Some(now)) => now.saturating_sub(start),
            _ => Duration::ZERO,
        };
        self.cpu[stage.index()].update_duration(cpu);

        if stage == Stage::Postprocess {
            self.frames += 1;
        }
        elapsed
    }

    /// Wall-clock means for `stage`
    pub fn stage(&self, stage: Stage) -> &RollingMean {
        &self.stages[stage.index()]
    }

    /// Process CPU time means for `stage`
    pub fn cpu_stage(&self, stage: Stage) -> &RollingMean {
        &self.cpu[stage.index()]
    }

    /// Frames fully processed
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Log a report if the interval elapsed; returns whether one was logged
    pub fn report(&mut self) -> bool {
        let due = self
            .last_report
            .map_or(true, |last| last.elapsed() >= self.report_interval);

        if due {
            self.force_report();
        }
        due
    }

    pub fn force_report(&mut self) {
        self.last_report = Some(Instant::now());

        for (name, stage) in [
            ("preprocess", Stage::Preprocess),
            ("infer", Stage::Infer),
            ("postprocess", Stage::Postprocess),
        ] {
            let wall = self.stage(stage);
            let cpu = self.cpu_stage(stage);
            tracing::info!(
                stage = name,
                wall_ms = wall.mean() * 1000.0,
                wall_recent_ms = wall.recent() * 1000.0,
                cpu_ms = cpu.mean() * 1000.0,
                cpu_recent_ms = cpu.recent() * 1000.0,
                frames = self.frames,
                "Stage timing"
            );
        }
    }
}
