//! Echo Worker - Answers every image with a fixed detection
//!
//! Run with: cargo run --example echo_worker -- [server_addr] [delay_ms]
//!
//! Stands in for a real model so the relay can be exercised end to end.
//! The optional delay simulates inference time; start several workers with
//! different delays to watch the dispatcher balance load while the output
//! stays in capture order.

use std::time::Duration;

use bytes::Bytes;

use infer_relay::{serve, Detection, InferenceBackend, StubConfig, WorkerStub};

/// Reports one centered box per image after a fixed delay
struct EchoBackend {
    delay: Duration,
}

impl InferenceBackend for EchoBackend {
    type Input = usize;
    type Output = usize;

    fn preprocess(&mut self, image: &Bytes) -> infer_relay::Result<usize> {
        Ok(image.len())
    }

    fn infer(&mut self, input: usize) -> infer_relay::Result<usize> {
        // Blocks the worker thread, as a real model call would
        std::thread::sleep(self.delay);
        Ok(input)
    }

    fn postprocess(&mut self, output: usize) -> infer_relay::Result<Vec<Detection>> {
        let class_id = if output == 0 { 0 } else { 1 };
        Ok(vec![Detection::new((75, 75, 225, 225), class_id, 0.87)])
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Usage: echo_worker [server_addr] [delay_ms]");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("infer_relay=info".parse()?),
        )
        .init();

    let mut config = StubConfig::default()
        .connect_timeout(Duration::from_secs(5))
        .report_interval(Duration::from_secs(5));
    if let Some(addr) = args.get(1) {
        config.server_addr = addr.clone();
    }
    let delay_ms: u64 = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(20);

    let mut stub = WorkerStub::connect(config.clone()).await?;
    let mut backend = EchoBackend {
        delay: Duration::from_millis(delay_ms),
    };

    let served = serve(&stub, &mut backend, config.report_interval).await?;
    stub.close().await;

    tracing::info!(frames = served, "Worker finished");
    Ok(())
}
