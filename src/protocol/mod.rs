//! Binary wire protocol between the dispatcher and its workers
//!
//! One persistent TCP connection per worker carries a strict
//! request/response alternation: the dispatcher writes one encoded frame,
//! the worker answers with one result set.

pub mod codec;
pub mod constants;
pub mod detection;

pub use codec::{
    encode_frame, encode_results, read_frame, read_results, write_frame, write_results,
    FrameDecoder, ResultDecoder,
};
pub use detection::Detection;
