//! Frame dispatcher
//!
//! Pulls frames from the source in capture order, encodes each at the
//! inference resolution and hands it to the lowest idle worker slot. Each
//! round trip runs on its own task:
//!
//! ```text
//! send frame -> await result set -> rescale boxes -> annotate
//!            -> park in reassembly buffer -> mark slot idle
//! ```
//!
//! A round trip that fails (peer closed, I/O error, timeout) retires its
//! slot for good, removes the connection from the registry and marks the
//! frame abandoned so reassembly can step over it. Other workers carry on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::media::frame::{
    Annotator, Frame, FrameEncoder, LabeledFrame, NoopAnnotator, PassthroughEncoder, Size,
    VideoSource,
};
use crate::media::labels::LabelMap;
use crate::reassembly::ReassemblyBuffer;
use crate::server::{Connection, ConnectionRegistry};
use crate::stats::latency::LatencyTracker;
use crate::stats::metrics::DispatchStats;

use super::slots::SlotTable;

/// How a single round trip ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Dropped,
}

/// State shared by every in-flight round trip
struct Shared {
    registry: Arc<ConnectionRegistry>,
    buffer: Arc<ReassemblyBuffer>,
    slots: SlotTable,
    connections: BTreeMap<usize, Arc<Connection>>,
    annotator: Arc<dyn Annotator>,
    labels: Option<Arc<LabelMap>>,
    latency: Mutex<LatencyTracker>,
    inference_size: Size,
}

/// Assigns frames to idle workers and collects their results
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    buffer: Arc<ReassemblyBuffer>,
    encoder: Arc<dyn FrameEncoder>,
    annotator: Arc<dyn Annotator>,
    labels: Option<Arc<LabelMap>>,
}

impl Dispatcher {
    /// Create a dispatcher over the registry's workers
    ///
    /// Loads the label file named in the registry config, if any.
    pub fn new(registry: Arc<ConnectionRegistry>, buffer: Arc<ReassemblyBuffer>) -> Result<Self> {
        let labels = match &registry.config().labels_path {
            Some(path) => Some(Arc::new(LabelMap::load(path)?)),
            None => None,
        };

        Ok(Self {
            registry,
            buffer,
            encoder: Arc::new(PassthroughEncoder),
            annotator: Arc::new(NoopAnnotator),
            labels,
        })
    }

    /// Set the encoder used to resize and encode frames for transport
    pub fn encoder(mut self, encoder: impl FrameEncoder + 'static) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    /// Set the annotator applied to completed frames
    pub fn annotator(mut self, annotator: impl Annotator + 'static) -> Self {
        self.annotator = Arc::new(annotator);
        self
    }

    /// Set the label map passed to the annotator
    pub fn labels(mut self, labels: LabelMap) -> Self {
        self.labels = Some(Arc::new(labels));
        self
    }

    /// Dispatch every frame from `source`
    ///
    /// Uses the workers registered at the time of the call; suspend the
    /// registry first so the pool is fixed for the session. Always records
    /// the final frame number in the reassembly buffer before returning.
    ///
    /// Frames that fail to encode or exceed `max_frame_len` are abandoned
    /// without touching any worker. Once every worker is retired the frame in
    /// hand is abandoned too and [`Error::NoWorkers`] carries the counters.
    pub async fn run<V: VideoSource>(&self, source: &mut V) -> Result<DispatchStats> {
        let config = self.registry.config();
        let connections: BTreeMap<usize, Arc<Connection>> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|c| c.is_alive())
            .map(|c| (c.slot(), c))
            .collect();

        tracing::info!(
            workers = connections.len(),
            inference_size = %config.inference_size,
            "Starting dispatch"
        );

        let shared = Arc::new(Shared {
            registry: Arc::clone(&self.registry),
            buffer: Arc::clone(&self.buffer),
            slots: SlotTable::new(connections.keys().copied()),
            connections,
            annotator: Arc::clone(&self.annotator),
            labels: self.labels.clone(),
            latency: Mutex::new(LatencyTracker::new(config.report_interval)),
            inference_size: config.inference_size,
        });

        let mut stats = DispatchStats::new();
        let mut tasks = JoinSet::new();
        let mut next_number = 0u64;
        let mut exhausted = false;
        let started = Instant::now();

        while let Some(mut frame) = source.next_frame() {
            frame.number = next_number;

            let payload = match self.encoder.encode(&frame, shared.inference_size) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(frame = frame.number, error = %e, "Failed to encode frame");
                    self.skip_frame(&mut stats, frame.number).await;
                    next_number += 1;
                    continue;
                }
            };

            // A worker would reject it and be retired for nothing
            if payload.len() > config.max_frame_len {
                tracing::warn!(
                    frame = frame.number,
                    bytes = payload.len(),
                    max = config.max_frame_len,
                    "Encoded frame too large, dropping"
                );
                self.skip_frame(&mut stats, frame.number).await;
                next_number += 1;
                continue;
            }

            let Some(slot) = shared.slots.acquire().await else {
                tracing::error!(frame = frame.number, "All workers retired, stopping dispatch");
                self.skip_frame(&mut stats, frame.number).await;
                next_number += 1;
                exhausted = true;
                break;
            };

            while let Some(done) = tasks.try_join_next() {
                tally(&mut stats, done);
            }

            stats.frames_dispatched += 1;
            stats.bytes_sent += payload.len() as u64;
            next_number += 1;

            let shared = Arc::clone(&shared);
            tasks.spawn(async move { round_trip(&shared, slot, frame, payload).await });
        }

        self.buffer.finish(next_number).await;
        tracing::debug!(frames = next_number, "Source exhausted");

        while let Some(done) = tasks.join_next().await {
            tally(&mut stats, done);
        }
        stats.duration = started.elapsed();
        stats.workers_retired =
            (shared.slots.len().await - shared.slots.live_count().await) as u64;

        shared.latency.lock().await.force_report();
        tracing::info!(
            dispatched = stats.frames_dispatched,
            completed = stats.frames_completed,
            dropped = stats.frames_dropped,
            retired = stats.workers_retired,
            fps = stats.fps(),
            bitrate_bps = stats.bitrate(),
            "Dispatch complete"
        );

        if exhausted {
            return Err(Error::NoWorkers {
                stats: Box::new(stats),
            });
        }
        Ok(stats)
    }

    /// Give up on a frame that was never sent
    async fn skip_frame(&self, stats: &mut DispatchStats, number: u64) {
        self.buffer.abandon(number).await;
        stats.frames_dropped += 1;
    }
}

fn tally(stats: &mut DispatchStats, done: std::result::Result<Outcome, tokio::task::JoinError>) {
    match done {
        Ok(Outcome::Completed) => stats.frames_completed += 1,
        Ok(Outcome::Dropped) => stats.frames_dropped += 1,
        Err(e) => {
            tracing::error!(error = %e, "Round trip task failed");
            stats.frames_dropped += 1;
        }
    }
}

async fn round_trip(shared: &Shared, slot: usize, frame: Frame, payload: Bytes) -> Outcome {
    let number = frame.number;
    let Some(conn) = shared.connections.get(&slot) else {
        shared.slots.retire(slot).await;
        shared.buffer.abandon(number).await;
        return Outcome::Dropped;
    };

    tracing::debug!(slot = slot, frame = number, bytes = payload.len(), "Sending frame");

    let start = Instant::now();
    let result = match conn.send_frame(&payload).await {
        Ok(()) => {
            let send_time = start.elapsed();
            conn.recv_results().await.map(|r| r.map(|dets| (send_time, dets)))
        }
        Err(e) => Err(e),
    };

    let (send_time, detections) = match result {
        Ok(Some(ok)) => ok,
        Ok(None) => {
            tracing::warn!(
                slot = slot,
                frame = number,
                "Worker connection broken, removing from rotation"
            );
            return drop_worker(shared, conn, slot, number).await;
        }
        Err(e) => {
            tracing::warn!(
                slot = slot,
                frame = number,
                error = %e,
                "Worker failed, removing from rotation"
            );
            return drop_worker(shared, conn, slot, number).await;
        }
    };

    let await_time = start.elapsed().saturating_sub(send_time);
    tracing::debug!(
        slot = slot,
        frame = number,
        detections = detections.len(),
        "Got result"
    );

    {
        let mut latency = shared.latency.lock().await;
        latency.record_send(slot, send_time);
        latency.record_await(slot, await_time);
        latency.report();
    }

    let detections = detections
        .iter()
        .map(|d| d.rescale(shared.inference_size, frame.size))
        .collect();
    let mut labeled = LabeledFrame {
        frame,
        detections,
        slot,
    };
    shared
        .annotator
        .annotate(&mut labeled, shared.labels.as_deref());

    shared.buffer.insert(labeled).await;
    shared.slots.release(slot).await;
    Outcome::Completed
}

/// Retire a failed worker and give up on its in-flight frame
async fn drop_worker(shared: &Shared, conn: &Arc<Connection>, slot: usize, number: u64) -> Outcome {
    shared.slots.retire(slot).await;
    shared.registry.remove(conn).await;
    shared.buffer.abandon(number).await;
    Outcome::Dropped
}
