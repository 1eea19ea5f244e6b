//! Capture-order reassembly of out-of-order results

pub mod buffer;

pub use buffer::{Reassembler, ReassemblyBuffer};
