//! Worker stub
//!
//! The worker's end of the connection. A background task decodes framed
//! images as they arrive and queues them; the worker pulls them one at a
//! time with [`WorkerStub::get_image`] and answers with
//! [`WorkerStub::send_results`].

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::codec::{read_frame, write_results, FrameDecoder};
use crate::protocol::constants::READ_BUFFER_SIZE;
use crate::protocol::detection::Detection;
use crate::server::connection::{wait_closed, with_timeout};

use super::config::StubConfig;

#[derive(Debug, Default)]
struct InboxState {
    images: VecDeque<Bytes>,
    /// The dispatcher closed its end; drain what is queued, then stop
    ended: bool,
    /// Stopped locally; hand out nothing more
    stopped: bool,
}

/// Inbound image queue shared by the receive task and the consumer
#[derive(Debug, Default)]
struct Inbox {
    state: Mutex<InboxState>,
    ready: Notify,
}

impl Inbox {
    async fn push(&self, image: Bytes) {
        {
            let mut state = self.state.lock().await;
            if state.stopped {
                return;
            }
            state.images.push_back(image);
        }
        self.ready.notify_one();
    }

    async fn end(&self) {
        self.state.lock().await.ended = true;
        self.ready.notify_one();
    }

    async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            state.stopped = true;
            state.images.clear();
        }
        self.ready.notify_one();
    }

    async fn pop(&self) -> Option<Bytes> {
        loop {
            let ready = self.ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.stopped {
                    return None;
                }
                if let Some(image) = state.images.pop_front() {
                    return Some(image);
                }
                if state.ended {
                    return None;
                }
            }

            ready.await;
        }
    }
}

/// Client-side counterpart of a dispatcher connection
pub struct WorkerStub {
    writer: Mutex<OwnedWriteHalf>,
    inbox: Arc<Inbox>,
    shutdown: watch::Sender<bool>,
    receiver: Option<JoinHandle<()>>,
    peer_addr: SocketAddr,
}

impl WorkerStub {
    /// Connect to the dispatcher and start receiving images
    pub async fn connect(config: StubConfig) -> Result<Self> {
        let stream = with_timeout(config.connect_timeout, async {
            TcpStream::connect(&config.server_addr)
                .await
                .map_err(Error::from)
        })
        .await?;

        if config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        let peer_addr = stream.peer_addr()?;
        tracing::info!(peer = %peer_addr, "Connected to dispatcher");

        let (reader, writer) = stream.into_split();
        let inbox = Arc::new(Inbox::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let receiver = tokio::spawn(receive_loop(
            reader,
            Arc::clone(&inbox),
            shutdown_rx,
            FrameDecoder::new(config.max_frame_len),
        ));

        Ok(Self {
            writer: Mutex::new(writer),
            inbox,
            shutdown,
            receiver: Some(receiver),
            peer_addr,
        })
    }

    /// Dispatcher address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Wait for the next image
    ///
    /// Returns `None` at stream end: after the dispatcher closes and the
    /// queue is drained, or as soon as [`close`](Self::close) is called.
    pub async fn get_image(&self) -> Option<Bytes> {
        self.inbox.pop().await
    }

    /// Send the result set for the most recent image
    pub async fn send_results(&self, detections: &[Detection]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_results(&mut *writer, detections).await
    }

    /// Stop receiving and wait for the receive task to exit
    ///
    /// No queue mutation happens after this returns.
    pub async fn close(&mut self) {
        self.shutdown.send_replace(true);
        self.inbox.stop().await;

        if let Some(receiver) = self.receiver.take() {
            if let Err(e) = receiver.await {
                tracing::error!(error = %e, "Receive task failed");
            }
        }
    }
}

impl Drop for WorkerStub {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}

async fn receive_loop(
    mut reader: OwnedReadHalf,
    inbox: Arc<Inbox>,
    shutdown: watch::Receiver<bool>,
    mut decoder: FrameDecoder,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        let frame = tokio::select! {
            _ = wait_closed(shutdown.clone()) => break,
            r = read_frame(&mut reader, &mut buf, &mut decoder) => r,
        };

        match frame {
            Ok(Some(image)) => {
                tracing::debug!(bytes = image.len(), "Received image");
                inbox.push(image).await;
            }
            Ok(None) => {
                tracing::info!("Dispatcher connection closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Receive failed");
                break;
            }
        }
    }

    inbox.end().await;
}
