//! Worker-side client
//!
//! Provides the worker's half of the relay:
//! - A stub that connects to the dispatcher and queues inbound images
//! - A serve loop driving an opaque inference backend

pub mod backend;
pub mod config;
pub mod stub;

pub use backend::{serve, InferenceBackend};
pub use config::StubConfig;
pub use stub::WorkerStub;
