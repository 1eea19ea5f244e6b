//! Worker serve loop
//!
//! A worker pulls images from its [`WorkerStub`], runs them through an
//! [`InferenceBackend`] and sends the detections back, timing each stage.

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::detection::Detection;
use crate::stats::stopwatch::{Stage, StageStopwatch};

use super::stub::WorkerStub;

/// Opaque model execution on a worker
///
/// Split into three stages so each can be timed separately. The methods run
/// on the serving task; a backend that blocks for long should be driven from
/// a dedicated runtime thread.
pub trait InferenceBackend: Send {
    /// Model-ready input
    type Input;
    /// Raw model output
    type Output;

    /// Decode and normalize one encoded image
    fn preprocess(&mut self, image: &Bytes) -> Result<Self::Input>;

    /// Run the model
    fn infer(&mut self, input: Self::Input) -> Result<Self::Output>;

    /// Turn raw output into detections in inference-input coordinates
    fn postprocess(&mut self, output: Self::Output) -> Result<Vec<Detection>>;
}

/// Serve images until the dispatcher closes the stream
///
/// Returns the number of frames answered. A backend error stops serving;
/// the dispatcher sees the connection drop and retires this worker.
pub async fn serve<B: InferenceBackend>(
    stub: &WorkerStub,
    backend: &mut B,
    report_interval: Duration,
) -> Result<u64> {
    let mut watch = StageStopwatch::new(report_interval);

    while let Some(image) = stub.get_image().await {
        tracing::debug!(frame = watch.frames(), bytes = image.len(), "Processing image");

        watch.start();
        let input = backend.preprocess(&image)?;
        watch.stop(Stage::Preprocess);

        watch.start();
        let output = backend.infer(input)?;
        watch.stop(Stage::Infer);

        watch.start();
        let detections = backend.postprocess(output)?;
        stub.send_results(&detections).await?;
        watch.stop(Stage::Postprocess);

        watch.report();
    }

    watch.force_report();
    Ok(watch.frames())
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::client::config::StubConfig;
    use crate::protocol::codec::{encode_frame, ResultDecoder};

    /// Reports one box whose class id is the image length
    struct LengthBackend;

    impl InferenceBackend for LengthBackend {
        type Input = usize;
        type Output = usize;

        fn preprocess(&mut self, image: &Bytes) -> Result<usize> {
            Ok(image.len())
        }

        fn infer(&mut self, input: usize) -> Result<usize> {
            Ok(input)
        }

        fn postprocess(&mut self, output: usize) -> Result<Vec<Detection>> {
            Ok(vec![Detection::new((0, 0, 10, 10), output as u16, 0.75)])
        }
    }

    #[tokio::test]
    async fn test_serve_answers_each_image() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let worker = tokio::spawn(async move {
            let stub = WorkerStub::connect(StubConfig::new(addr.to_string()))
                .await
                .unwrap();
            serve(&stub, &mut LengthBackend, Duration::from_secs(60)).await
        });

        let (mut dispatcher, _) = listener.accept().await.unwrap();
        let mut decoder = ResultDecoder::new();

        for payload in [&b"abc"[..], &b"hello"[..]] {
            dispatcher
                .write_all(&encode_frame(payload).unwrap())
                .await
                .unwrap();

            let mut raw = [0u8; 17];
            dispatcher.read_exact(&mut raw).await.unwrap();
            let results = decoder.decode(&mut BytesMut::from(&raw[..])).unwrap();
            assert_eq!(results[0].class_id as usize, payload.len());
        }

        drop(dispatcher);
        assert_eq!(worker.await.unwrap().unwrap(), 2);
    }
}
