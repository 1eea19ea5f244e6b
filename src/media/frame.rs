//! Frames and the collaborator traits around the dispatch pipeline
//!
//! Decoding the video, resizing/encoding for transport, drawing overlays and
//! persisting output are all owned by the caller. The dispatcher only sees
//! them through the traits below.

use bytes::Bytes;

use crate::error::Result;
use crate::media::labels::LabelMap;
use crate::protocol::detection::Detection;

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A raw frame from the video source
///
/// `number` is assigned by the dispatcher in capture order, starting at 0.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number in capture order
    pub number: u64,
    /// Original resolution
    pub size: Size,
    /// Pixel data, format opaque to this crate (cheap to clone)
    pub data: Bytes,
}

impl Frame {
    pub fn new(size: Size, data: Bytes) -> Self {
        Self {
            number: 0,
            size,
            data,
        }
    }
}

/// A completed frame with its detections mapped back to frame resolution
#[derive(Debug, Clone)]
pub struct LabeledFrame {
    /// The original frame (possibly with overlays drawn in)
    pub frame: Frame,
    /// Detections in `frame.size` coordinates
    pub detections: Vec<Detection>,
    /// Slot of the worker that produced the detections
    pub slot: usize,
}

impl LabeledFrame {
    /// Frame sequence number
    pub fn number(&self) -> u64 {
        self.frame.number
    }
}

/// Finite, ordered source of raw frames
pub trait VideoSource: Send {
    /// Next frame, or `None` once the input is exhausted
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Resizes a frame to the inference resolution and encodes it for transport
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame, target: Size) -> Result<Bytes>;
}

/// Draws detections onto a completed frame
pub trait Annotator: Send + Sync {
    fn annotate(&self, frame: &mut LabeledFrame, labels: Option<&LabelMap>);
}

/// Persists completed frames in the order they are delivered
pub trait OutputSink: Send {
    fn write(&mut self, frame: LabeledFrame) -> Result<()>;
}

/// Encoder that forwards the pixel buffer untouched
///
/// Useful when the source already produces inference-sized, encoded images.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEncoder;

impl FrameEncoder for PassthroughEncoder {
    fn encode(&self, frame: &Frame, _target: Size) -> Result<Bytes> {
        Ok(frame.data.clone())
    }
}

/// Annotator that leaves frames untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnnotator;

impl Annotator for NoopAnnotator {
    fn annotate(&self, _frame: &mut LabeledFrame, _labels: Option<&LabelMap>) {}
}

/// Video source over an in-memory list of frames
#[derive(Debug, Default)]
pub struct VecSource {
    frames: std::collections::VecDeque<Frame>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl VideoSource for VecSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
}

/// Output sink collecting frames into a vector
#[derive(Debug, Default)]
pub struct VecSink {
    pub frames: Vec<LabeledFrame>,
}

impl OutputSink for VecSink {
    fn write(&mut self, frame: LabeledFrame) -> Result<()> {
        self.frames.push(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_source_order() {
        let mut source = VecSource::new(vec![
            Frame::new(Size::new(2, 2), Bytes::from_static(b"a")),
            Frame::new(Size::new(2, 2), Bytes::from_static(b"b")),
        ]);

        assert_eq!(&source.next_frame().unwrap().data[..], b"a");
        assert_eq!(&source.next_frame().unwrap().data[..], b"b");
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_passthrough_encoder() {
        let frame = Frame::new(Size::new(640, 480), Bytes::from_static(b"jpeg"));
        let out = PassthroughEncoder.encode(&frame, Size::new(300, 300)).unwrap();
        assert_eq!(&out[..], b"jpeg");
    }

    #[test]
    fn test_size_display() {
        assert_eq!(Size::new(300, 300).to_string(), "300x300");
    }
}
