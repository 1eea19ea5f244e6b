//! Relay Host - Dispatches a synthetic video to connected workers
//!
//! Run with: cargo run --example relay_host -- [workers] [frames] [bind_addr]
//!
//! Then start one or more workers in other terminals:
//!
//! ```bash
//! cargo run --example echo_worker -- 127.0.0.1:45005
//! ```
//!
//! This example demonstrates:
//! - Waiting for a fixed pool of workers before a session starts
//! - Dispatching frames to the lowest idle worker
//! - Reassembling results in capture order on a background task
//! - An `OutputSink` that prints each frame as it is stitched

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use infer_relay::media::{Frame, LabeledFrame, OutputSink, Size, VecSource};
use infer_relay::{ConnectionRegistry, Dispatcher, Reassembler, ReassemblyBuffer, RelayConfig};

/// Prints one line per completed frame
struct PrintSink;

impl OutputSink for PrintSink {
    fn write(&mut self, frame: LabeledFrame) -> infer_relay::Result<()> {
        let objects = frame
            .detections
            .iter()
            .filter(|d| !d.is_background())
            .count();
        println!(
            "frame {:>5}  worker {}  objects {}",
            frame.number(),
            frame.slot,
            objects
        );
        Ok(())
    }
}

/// Gradient frames, 640x480 RGB
fn synthetic_video(count: u64) -> VecSource {
    let size = Size::new(640, 480);
    VecSource::new((0..count).map(move |n| {
        let shade = (n % 256) as u8;
        let data = vec![shade; (size.width * size.height * 3) as usize];
        Frame::new(size, Bytes::from(data))
    }))
}

fn print_usage() {
    println!("Usage: relay_host [workers] [frames] [bind_addr]");
    println!();
    println!("  workers    Number of workers to wait for (default: 1)");
    println!("  frames     Number of synthetic frames to dispatch (default: 300)");
    println!("  bind_addr  Address to listen on (default: 0.0.0.0:45005)");
    println!();
    println!("Set RUST_LOG=infer_relay=debug for per-frame logs.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let workers: usize = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(1);
    let frames: u64 = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(300);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("infer_relay=info".parse()?)
                .add_directive("relay_host=debug".parse()?),
        )
        .init();

    let mut config = RelayConfig::default().report_interval(Duration::from_secs(5));
    if let Some(addr) = args.get(3) {
        config = config.bind(addr.parse()?);
    }

    let registry = Arc::new(ConnectionRegistry::bind(config).await?);
    tracing::info!(addr = %registry.local_addr(), workers, "Waiting for workers");

    registry.wait_for(workers, Duration::from_secs(300)).await?;
    registry.suspend();

    let buffer = Arc::new(ReassemblyBuffer::new());
    let stitcher = Reassembler::spawn(Arc::clone(&buffer), PrintSink);

    let dispatcher = Dispatcher::new(Arc::clone(&registry), buffer)?;
    let result = dispatcher.run(&mut synthetic_video(frames)).await;

    let (_, stitched) = stitcher.await??;
    registry.close().await;

    let stats = match result {
        Ok(stats) => stats,
        Err(infer_relay::Error::NoWorkers { stats }) => {
            tracing::warn!("Every worker failed before the video ended");
            *stats
        }
        Err(e) => return Err(e.into()),
    };
    println!();
    println!(
        "dispatched {}  completed {}  dropped {}  retired workers {}",
        stats.frames_dispatched, stats.frames_completed, stats.frames_dropped, stats.workers_retired
    );
    println!(
        "stitched {}  skipped {}  {:.1} fps",
        stitched.written,
        stitched.skipped,
        stats.fps()
    );

    Ok(())
}
