//! A single worker connection
//!
//! Each connection owns its socket and receive accumulator behind one async
//! lock; a round trip holds it for the send and the awaited result. Closing
//! is signalled through a watch channel so that an in-flight read is woken
//! and resolves as a closed connection rather than hanging.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_results, write_frame, ResultDecoder};
use crate::protocol::constants::READ_BUFFER_SIZE;
use crate::protocol::detection::Detection;

/// Run `fut`, failing with `Error::Timeout` once `limit` elapses
pub(crate) async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await?,
        None => fut.await,
    }
}

/// Resolve once the close flag is raised
pub(crate) async fn wait_closed(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct ConnectionIo {
    stream: TcpStream,
    read_buf: BytesMut,
    decoder: ResultDecoder,
}

/// An active session with one worker
pub struct Connection {
    slot: usize,
    peer_addr: SocketAddr,
    io: Mutex<Option<ConnectionIo>>,
    alive: AtomicBool,
    closed: watch::Sender<bool>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Connection {
    pub(crate) fn new(
        slot: usize,
        stream: TcpStream,
        peer_addr: SocketAddr,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        let (closed, _) = watch::channel(false);

        Self {
            slot,
            peer_addr,
            io: Mutex::new(Some(ConnectionIo {
                stream,
                read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
                decoder: ResultDecoder::new(),
            })),
            alive: AtomicBool::new(true),
            closed,
            read_timeout,
            write_timeout,
        }
    }

    /// Stable slot index assigned at accept time
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// False once the connection has been closed or judged dead
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Send one encoded image
    ///
    /// Fails with `Error::Timeout` if the write timeout elapses first, for
    /// example when the worker stopped reading and the send buffer is full.
    pub async fn send_frame(&self, payload: &[u8]) -> Result<()> {
        let mut io = self.io.lock().await;
        let Some(conn) = io.as_mut() else {
            return Err(Error::ConnectionClosed);
        };

        let write = with_timeout(self.write_timeout, write_frame(&mut conn.stream, payload));
        let result = tokio::select! {
            _ = wait_closed(self.closed.subscribe()) => Err(Error::ConnectionClosed),
            r = write => r,
        };

        if result.is_err() {
            self.fail(&mut io);
        }
        result
    }

    /// Await the next result set
    ///
    /// Returns `Ok(None)` if the worker closed the connection (or it was
    /// closed locally) before a complete set arrived.
    pub async fn recv_results(&self) -> Result<Option<Vec<Detection>>> {
        let mut io = self.io.lock().await;
        let Some(conn) = io.as_mut() else {
            return Ok(None);
        };

        let read = with_timeout(
            self.read_timeout,
            read_results(&mut conn.stream, &mut conn.read_buf, &mut conn.decoder),
        );
        let result = tokio::select! {
            _ = wait_closed(self.closed.subscribe()) => Ok(None),
            r = read => r,
        };

        if !matches!(result, Ok(Some(_))) {
            self.fail(&mut io);
        }
        result
    }

    /// Close the socket and wake any pending I/O
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.closed.send_replace(true);

        // If nothing is mid-round-trip, drop the socket right away. Otherwise
        // the round trip wakes on the watch and drops it.
        if let Ok(mut io) = self.io.try_lock() {
            io.take();
        }
    }

    fn fail(&self, io: &mut Option<ConnectionIo>) {
        self.alive.store(false, Ordering::Release);
        if let Some(mut conn) = io.take() {
            // Best effort FIN so the worker sees EOF promptly
            tokio::spawn(async move {
                let _ = conn.stream.shutdown().await;
            });
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("slot", &self.slot)
            .field("peer_addr", &self.peer_addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::encode_results;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair_with(
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let worker = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        let conn = Connection::new(0, server_side, peer, read_timeout, write_timeout);
        (conn, worker)
    }

    async fn pair(read_timeout: Option<Duration>) -> (Connection, TcpStream) {
        pair_with(read_timeout, None).await
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (conn, mut worker) = pair(None).await;

        conn.send_frame(b"image").await.unwrap();

        let mut header = [0u8; 4];
        worker.read_exact(&mut header).await.unwrap();
        assert_eq!(u32::from_le_bytes(header), 5);
        let mut payload = [0u8; 5];
        worker.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"image");

        let reply = encode_results(&[Detection::new((1, 2, 3, 4), 9, 0.5)]).unwrap();
        worker.write_all(&reply).await.unwrap();

        let results = conn.recv_results().await.unwrap().unwrap();
        assert_eq!(results, vec![Detection::new((1, 2, 3, 4), 9, 0.5)]);
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn test_peer_close_yields_none() {
        let (conn, worker) = pair(None).await;
        drop(worker);

        assert!(conn.recv_results().await.unwrap().is_none());
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_local_close_wakes_reader() {
        let (conn, _worker) = pair(None).await;
        let conn = std::sync::Arc::new(conn);

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.recv_results().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close();

        let result = reader.await.unwrap().unwrap();
        assert!(result.is_none());
        assert!(conn.send_frame(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (conn, _worker) = pair(Some(Duration::from_millis(20))).await;

        let err = conn.recv_results().await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_write_timeout_on_stalled_worker() {
        // The worker never reads, so a large enough frame fills both socket buffers
        let (conn, _worker) = pair_with(None, Some(Duration::from_millis(200))).await;
        let payload = vec![0u8; 64 * 1024 * 1024];

        let err = conn.send_frame(&payload).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(!conn.is_alive());
    }
}
