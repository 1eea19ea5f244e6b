//! Order-preserving reassembly of completed frames
//!
//! Round trips finish in any order. Each one parks its labeled frame in the
//! [`ReassemblyBuffer`] keyed by frame number; the [`Reassembler`] holds a
//! "next expected" counter and writes frames to the sink strictly in
//! ascending order, waiting as long as needed for lower numbers to arrive.
//!
//! A frame whose round trip failed is marked abandoned rather than left
//! missing, so the reassembler steps over it instead of stalling forever.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::media::frame::{LabeledFrame, OutputSink};
use crate::stats::metrics::StitchStats;

#[derive(Debug)]
enum Entry {
    Completed(LabeledFrame),
    Abandoned,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<u64, Entry>,
    /// Next frame number the reassembler will emit
    next_expected: u64,
    /// Total frame count once the source is exhausted
    end: Option<u64>,
    /// Nothing drains the buffer any more
    stopped: bool,
}

/// Completed frames waiting for their turn
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    state: Mutex<State>,
    changed: Notify,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a completed frame
    pub async fn insert(&self, frame: LabeledFrame) {
        let number = frame.number();
        self.put(number, Entry::Completed(frame)).await;
    }

    /// Mark a frame number as never going to complete
    pub async fn abandon(&self, number: u64) {
        self.put(number, Entry::Abandoned).await;
    }

    async fn put(&self, number: u64, entry: Entry) {
        {
            let mut state = self.state.lock().await;
            if state.stopped {
                tracing::debug!(frame = number, "Reassembly stopped, discarding frame");
                return;
            }
            if number < state.next_expected || state.entries.contains_key(&number) {
                tracing::warn!(frame = number, "Ignoring duplicate or late frame");
                return;
            }
            state.entries.insert(number, entry);
        }
        self.changed.notify_one();
    }

    /// Record that frames `0..total` are all that will ever arrive
    pub async fn finish(&self, total: u64) {
        self.state.lock().await.end = Some(total);
        self.changed.notify_one();
    }

    /// Stop accepting frames and discard everything parked
    ///
    /// Called when the reassembler gives up, so completed frames are not
    /// held for a consumer that is gone.
    pub async fn stop(&self) {
        let discarded = {
            let mut state = self.state.lock().await;
            state.stopped = true;
            std::mem::take(&mut state.entries).len()
        };
        if discarded > 0 {
            tracing::warn!(discarded = discarded, "Reassembly stopped with frames pending");
        }
    }

    /// Whether [`stop`](Self::stop) has been called
    pub async fn is_stopped(&self) -> bool {
        self.state.lock().await.stopped
    }

    /// Last frame number of the session, once known
    pub async fn final_frame(&self) -> Option<u64> {
        self.state.lock().await.end.and_then(|end| end.checked_sub(1))
    }

    /// Frames parked and not yet emitted
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Take every entry contiguous from `next_expected`
    ///
    /// Returns the entries in order and whether the session is complete.
    async fn take_ready(&self) -> (Vec<(u64, Entry)>, bool) {
        let mut state = self.state.lock().await;
        let mut ready = Vec::new();

        loop {
            let next = state.next_expected;
            let Some(entry) = state.entries.remove(&next) else {
                break;
            };
            ready.push((next, entry));
            state.next_expected += 1;
        }

        let done = state.end.is_some_and(|end| state.next_expected >= end);
        (ready, done)
    }
}

/// Drains a [`ReassemblyBuffer`] into an [`OutputSink`] in frame order
pub struct Reassembler {
    buffer: Arc<ReassemblyBuffer>,
}

impl Reassembler {
    pub fn new(buffer: Arc<ReassemblyBuffer>) -> Self {
        Self { buffer }
    }

    /// Emit frames until every frame number up to the final one is accounted for
    pub async fn run<S: OutputSink>(&self, sink: &mut S) -> Result<StitchStats> {
        let mut stats = StitchStats::default();

        loop {
            let changed = self.buffer.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let (ready, done) = self.buffer.take_ready().await;
            for (number, entry) in ready {
                match entry {
                    Entry::Completed(frame) => {
                        if let Err(e) = sink.write(frame) {
                            tracing::error!(frame = number, error = %e, "Output sink failed");
                            self.buffer.stop().await;
                            return Err(e);
                        }
                        stats.written += 1;
                        tracing::debug!(frame = number, "Stitched frame");
                    }
                    Entry::Abandoned => {
                        stats.skipped += 1;
                        tracing::warn!(frame = number, "Skipping abandoned frame");
                    }
                }
            }

            if done {
                break;
            }
            changed.await;
        }

        tracing::info!(
            written = stats.written,
            skipped = stats.skipped,
            "Reassembly complete"
        );
        Ok(stats)
    }

    /// Run on a background task, handing the sink back when done
    pub fn spawn<S>(
        buffer: Arc<ReassemblyBuffer>,
        mut sink: S,
    ) -> JoinHandle<Result<(S, StitchStats)>>
    where
        S: OutputSink + 'static,
    {
        tokio::spawn(async move {
            let stats = Reassembler::new(buffer).run(&mut sink).await?;
            Ok((sink, stats))
        })
    }
}
