//! End-to-end dispatch over loopback TCP with scripted workers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use infer_relay::media::{Annotator, Frame, LabelMap, LabeledFrame, Size, VecSink, VecSource};
use infer_relay::stats::{DispatchStats, StitchStats};
use infer_relay::{
    ConnectionRegistry, Detection, Dispatcher, Error, Reassembler, ReassemblyBuffer,
    RelayConfig, StubConfig, WorkerStub,
};

const FRAME_SIZE: Size = Size::new(600, 600);

fn payload(number: u64) -> Bytes {
    Bytes::copy_from_slice(&number.to_le_bytes())
}

fn source(count: u64) -> VecSource {
    VecSource::new((0..count).map(|n| Frame::new(FRAME_SIZE, payload(n))))
}

async fn bind_registry() -> Arc<ConnectionRegistry> {
    let config = RelayConfig::with_addr("127.0.0.1:0".parse().unwrap())
        .report_interval(Duration::from_secs(3600));
    Arc::new(ConnectionRegistry::bind(config).await.unwrap())
}

/// Worker that echoes the frame number back as the class id after `delay`
async fn start_worker<F>(addr: SocketAddr, delay: F) -> JoinHandle<u64>
where
    F: Fn(u64) -> Duration + Send + 'static,
{
    let stub = WorkerStub::connect(StubConfig::new(addr.to_string()))
        .await
        .unwrap();

    tokio::spawn(async move {
        let mut served = 0;
        while let Some(image) = stub.get_image().await {
            let number = u64::from_le_bytes(image[..8].try_into().unwrap());
            tokio::time::sleep(delay(number)).await;

            let detection = Detection::new((0, 0, 150, 150), number as u16, 0.9);
            if stub.send_results(&[detection]).await.is_err() {
                break;
            }
            served += 1;
        }
        served
    })
}

/// Worker that hangs up as soon as it receives its first frame
async fn start_failing_worker(addr: SocketAddr) -> JoinHandle<u64> {
    let stub = WorkerStub::connect(StubConfig::new(addr.to_string()))
        .await
        .unwrap();

    tokio::spawn(async move {
        let _ = stub.get_image().await;
        drop(stub);
        0
    })
}

fn numbers(sink: &VecSink) -> Vec<u64> {
    sink.frames.iter().map(LabeledFrame::number).collect()
}

async fn session(
    registry: &Arc<ConnectionRegistry>,
    frames: u64,
    build: impl FnOnce(Dispatcher) -> Dispatcher,
) -> (infer_relay::Result<DispatchStats>, VecSink, StitchStats) {
    registry.suspend();

    let buffer = Arc::new(ReassemblyBuffer::new());
    let stitcher = Reassembler::spawn(buffer.clone(), VecSink::default());
    let dispatcher = build(Dispatcher::new(registry.clone(), buffer.clone()).unwrap());

    let result = dispatcher.run(&mut source(frames)).await;
    let (sink, stats) = tokio::time::timeout(Duration::from_secs(10), stitcher)
        .await
        .expect("reassembler stalled")
        .unwrap()
        .unwrap();

    (result, sink, stats)
}

#[tokio::test]
async fn test_two_workers_output_in_capture_order() {
    let registry = bind_registry().await;
    let addr = registry.local_addr();

    let _slow = start_worker(addr, |_| Duration::from_millis(100)).await;
    registry.wait_for(1, Duration::from_secs(2)).await.unwrap();
    let _fast = start_worker(addr, |_| Duration::from_millis(10)).await;
    registry.wait_for(2, Duration::from_secs(2)).await.unwrap();

    let (result, sink, stitched) = session(&registry, 4, |d| d).await;
    let stats = result.unwrap();

    assert_eq!(numbers(&sink), vec![0, 1, 2, 3]);
    assert_eq!(stitched, StitchStats { written: 4, skipped: 0 });
    assert_eq!(stats.frames_dispatched, 4);
    assert_eq!(stats.frames_completed, 4);

    // Dispatch starts at the lowest idle slot
    assert_eq!(sink.frames[0].slot, 0);
    assert_eq!(sink.frames[1].slot, 1);

    registry.close().await;
}

#[tokio::test]
async fn test_many_frames_varying_latency_stay_ordered() {
    let registry = bind_registry().await;
    let addr = registry.local_addr();

    for i in 0..3u64 {
        let _ = start_worker(addr, move |n| Duration::from_millis((n * 37 + i * 11) % 17)).await;
        registry
            .wait_for(i as usize + 1, Duration::from_secs(2))
            .await
            .unwrap();
    }

    let (result, sink, stitched) = session(&registry, 40, |d| d).await;
    let stats = result.unwrap();

    assert_eq!(numbers(&sink), (0..40).collect::<Vec<_>>());
    assert_eq!(stitched.written, 40);
    assert_eq!(stats.frames_completed, 40);

    // Each frame carries its own result, rescaled from 300x300 to 600x600
    for frame in &sink.frames {
        assert_eq!(frame.detections.len(), 1);
        assert_eq!(frame.detections[0].class_id as u64, frame.number());
        assert_eq!(frame.detections[0].bbox(), (0, 0, 300, 300));
    }

    registry.close().await;
}

#[tokio::test]
async fn test_failed_worker_is_isolated() {
    let registry = bind_registry().await;
    let addr = registry.local_addr();

    let _broken = start_failing_worker(addr).await;
    registry.wait_for(1, Duration::from_secs(2)).await.unwrap();
    let healthy = start_worker(addr, |_| Duration::from_millis(5)).await;
    registry.wait_for(2, Duration::from_secs(2)).await.unwrap();

    let (result, sink, stitched) = session(&registry, 6, |d| d).await;
    let stats = result.unwrap();

    // Frame 0 went to the broken worker and is skipped, not waited on
    assert_eq!(numbers(&sink), vec![1, 2, 3, 4, 5]);
    assert_eq!(stitched, StitchStats { written: 5, skipped: 1 });
    assert_eq!(stats.frames_dispatched, 6);
    assert_eq!(stats.frames_completed, 5);
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.workers_retired, 1);
    assert!(sink.frames.iter().all(|f| f.slot == 1));
    assert_eq!(registry.len().await, 1);

    registry.close().await;
    assert_eq!(healthy.await.unwrap(), 5);
}

#[tokio::test]
async fn test_all_workers_failed() {
    let registry = bind_registry().await;
    let _broken = start_failing_worker(registry.local_addr()).await;
    registry.wait_for(1, Duration::from_secs(2)).await.unwrap();

    let (result, sink, stitched) = session(&registry, 3, |d| d).await;

    // Frame 0 was lost with the worker, frame 1 was in hand when the pool ran dry
    let stats = match result {
        Err(Error::NoWorkers { stats }) => stats,
        other => panic!("expected NoWorkers, got {:?}", other),
    };
    assert_eq!(stats.frames_dispatched, 1);
    assert_eq!(stats.frames_completed, 0);
    assert_eq!(stats.frames_dropped, 2);
    assert_eq!(stats.workers_retired, 1);
    assert!(sink.frames.is_empty());
    assert_eq!(stitched, StitchStats { written: 0, skipped: 2 });

    registry.close().await;
}

#[tokio::test]
async fn test_no_workers() {
    let registry = bind_registry().await;

    let (result, _sink, stitched) = session(&registry, 2, |d| d).await;

    let stats = match result {
        Err(Error::NoWorkers { stats }) => stats,
        other => panic!("expected NoWorkers, got {:?}", other),
    };
    assert_eq!(stats.frames_dispatched, 0);
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stitched, StitchStats { written: 0, skipped: 1 });
}

#[tokio::test]
async fn test_oversized_frames_dropped_before_send() {
    let config = RelayConfig::with_addr("127.0.0.1:0".parse().unwrap()).max_frame_len(4);
    let registry = Arc::new(ConnectionRegistry::bind(config).await.unwrap());
    let worker = start_worker(registry.local_addr(), |_| Duration::ZERO).await;
    registry.wait_for(1, Duration::from_secs(2)).await.unwrap();

    // Every payload is 8 bytes
    let (result, sink, stitched) = session(&registry, 3, |d| d).await;
    let stats = result.unwrap();

    assert_eq!(stats.frames_dispatched, 0);
    assert_eq!(stats.frames_dropped, 3);
    assert_eq!(stats.bytes_sent, 0);
    assert_eq!(stats.workers_retired, 0);
    assert!(sink.frames.is_empty());
    assert_eq!(stitched, StitchStats { written: 0, skipped: 3 });

    // The worker stays registered and was never sent anything
    assert_eq!(registry.len().await, 1);
    assert!(registry.snapshot().await[0].is_alive());
    registry.close().await;
    assert_eq!(worker.await.unwrap(), 0);
}

/// Writes the label of the first detection into the frame data
struct LabelWriter;

impl Annotator for LabelWriter {
    fn annotate(&self, frame: &mut LabeledFrame, labels: Option<&LabelMap>) {
        if let (Some(det), Some(labels)) = (frame.detections.first(), labels) {
            frame.frame.data = Bytes::from(labels.label(det.class_id));
        }
    }
}

#[tokio::test]
async fn test_annotator_sees_labels() {
    let registry = bind_registry().await;
    let _worker = start_worker(registry.local_addr(), |_| Duration::ZERO).await;
    registry.wait_for(1, Duration::from_secs(2)).await.unwrap();

    let mut labels = LabelMap::new();
    labels.insert(0, "background");
    labels.insert(1, "person");

    let (result, sink, _) =
        session(&registry, 3, |d| d.annotator(LabelWriter).labels(labels)).await;
    result.unwrap();

    let texts: Vec<&[u8]> = sink.frames.iter().map(|f| &f.frame.data[..]).collect();
    assert_eq!(texts, vec![&b"background"[..], &b"person"[..], &b"2"[..]]);

    registry.close().await;
}

#[tokio::test]
async fn test_labels_loaded_from_config() {
    let path = std::env::temp_dir().join(format!(
        "infer-relay-labels-{}.txt",
        std::process::id()
    ));
    std::fs::write(&path, "0 background\n1 traffic light\n").unwrap();

    let config = RelayConfig::with_addr("127.0.0.1:0".parse().unwrap()).labels_path(&path);
    let registry = Arc::new(ConnectionRegistry::bind(config).await.unwrap());
    let _worker = start_worker(registry.local_addr(), |_| Duration::ZERO).await;
    registry.wait_for(1, Duration::from_secs(2)).await.unwrap();

    let (result, sink, _) = session(&registry, 2, |d| d.annotator(LabelWriter)).await;
    result.unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(&sink.frames[1].frame.data[..], b"traffic light");

    registry.close().await;
}

#[tokio::test]
async fn test_missing_label_file() {
    let config = RelayConfig::with_addr("127.0.0.1:0".parse().unwrap())
        .labels_path("/nonexistent/infer-relay/labels.txt");
    let registry = Arc::new(ConnectionRegistry::bind(config).await.unwrap());

    let result = Dispatcher::new(registry.clone(), Arc::new(ReassemblyBuffer::new()));
    assert!(matches!(result, Err(Error::Io(_))));

    registry.close().await;
}
