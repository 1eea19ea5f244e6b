//! Session counters for a dispatch run

use std::time::Duration;

/// Counters for one dispatch session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStats {
    /// Frames pulled from the source and handed to a worker
    pub frames_dispatched: u64,
    /// Round trips that produced a result set
    pub frames_completed: u64,
    /// Frames that never produced a result: lost to a failed worker,
    /// rejected by the encoder or size limit, or left when no worker remained
    pub frames_dropped: u64,
    /// Encoded frame bytes written to workers
    pub bytes_sent: u64,
    /// Workers retired after a failure
    pub workers_retired: u64,
    /// Wall time from first dispatch to the last completion
    pub duration: Duration,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed frames per second over the session
    pub fn fps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_completed as f64 / secs
        } else {
            0.0
        }
    }

    /// Average upstream bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            (self.bytes_sent as f64 * 8.0 / secs) as u64
        } else {
            0
        }
    }
}

/// Counters for one reassembly run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StitchStats {
    /// Frames written to the output sink
    pub written: u64,
    /// Frame numbers skipped because their round trip was abandoned
    pub skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_stats_new() {
        let stats = DispatchStats::new();
        assert_eq!(stats.frames_dispatched, 0);
        assert_eq!(stats.frames_completed, 0);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.fps(), 0.0);
        assert_eq!(stats.bitrate(), 0);
    }

    #[test]
    fn test_dispatch_stats_rates() {
        let stats = DispatchStats {
            frames_completed: 300,
            bytes_sent: 1_000_000,
            duration: Duration::from_secs(10),
            ..Default::default()
        };

        assert!((stats.fps() - 30.0).abs() < 1e-9);
        // 1,000,000 bytes * 8 bits / 10 seconds = 800,000 bps
        assert_eq!(stats.bitrate(), 800_000);
    }
}
