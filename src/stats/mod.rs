//! Instrumentation
//!
//! Rolling latency means per worker slot and per worker-side stage, plus
//! session counters for dispatch and reassembly.

pub mod latency;
pub mod metrics;
pub mod stopwatch;

pub use latency::{LatencyTracker, RollingMean, WorkerLatency, WorkerReport};
pub use metrics::{DispatchStats, StitchStats};
pub use stopwatch::{Stage, StageStopwatch};
