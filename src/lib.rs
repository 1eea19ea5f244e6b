//! Distributed inference relay
//!
//! Streams video frames from one producer to a pool of remote inference
//! workers over persistent TCP connections, hands each frame to whichever
//! worker is idle, and reassembles the per-frame detections in capture order.
//!
//! ```text
//!  VideoSource ──► Dispatcher ──frame──► Connection ══TCP══► WorkerStub ──► InferenceBackend
//!                      │                     ▲                   │
//!                      │                     └══════results══════┘
//!                      ▼
//!              ReassemblyBuffer ──► Reassembler ──► OutputSink (capture order)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use infer_relay::media::{VecSink, VecSource};
//! use infer_relay::reassembly::{Reassembler, ReassemblyBuffer};
//! use infer_relay::server::{ConnectionRegistry, RelayConfig};
//! use infer_relay::Dispatcher;
//!
//! # async fn example() -> infer_relay::Result<()> {
//! let registry = Arc::new(ConnectionRegistry::bind(RelayConfig::default()).await?);
//! registry.wait_for(2, Duration::from_secs(60)).await?;
//! registry.suspend();
//!
//! let buffer = Arc::new(ReassemblyBuffer::new());
//! let stitcher = Reassembler::spawn(buffer.clone(), VecSink::default());
//!
//! let dispatcher = Dispatcher::new(registry.clone(), buffer)?;
//! let mut source = VecSource::new(Vec::new());
//! dispatcher.run(&mut source).await?;
//!
//! let (_sink, _stats) = stitcher.await.expect("reassembler panicked")?;
//! registry.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod protocol;
pub mod reassembly;
pub mod server;
pub mod stats;

pub use client::{serve, InferenceBackend, StubConfig, WorkerStub};
pub use dispatch::Dispatcher;
pub use error::{Error, ProtocolError, Result};
pub use protocol::Detection;
pub use reassembly::{Reassembler, ReassemblyBuffer};
pub use server::{Connection, ConnectionRegistry, RelayConfig};
