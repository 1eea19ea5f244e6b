//! Frame types and the external media collaborators
//!
//! This module provides:
//! - Frame and labeled-frame types
//! - Traits for the video source, transport encoder, annotator and output sink
//! - Label file parsing for rendering

pub mod frame;
pub mod labels;

pub use frame::{
    Annotator, Frame, FrameEncoder, LabeledFrame, NoopAnnotator, OutputSink, PassthroughEncoder,
    Size, VecSink, VecSource, VideoSource,
};
pub use labels::LabelMap;
