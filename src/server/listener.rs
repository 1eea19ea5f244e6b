//! Worker connection registry
//!
//! Binds the listening socket and runs an accept loop in the background.
//! Every accepted socket is wrapped in a [`Connection`] with the next stable
//! slot index and appended to the live list, until acceptance is suspended.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::server::config::RelayConfig;
use crate::server::connection::Connection;

struct Shared {
    config: RelayConfig,
    connections: RwLock<Vec<Arc<Connection>>>,
    accepting: AtomicBool,
    next_slot: AtomicUsize,
    added: Notify,
}

impl Shared {
    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.register(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn register(&self, socket: TcpStream, peer_addr: SocketAddr) {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::debug!(peer = %peer_addr, "Connection rejected: acceptance suspended");
            return;
        }

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(peer = %peer_addr, error = %e, "Failed to configure socket");
                return;
            }
        }

        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Connection::new(
            slot,
            socket,
            peer_addr,
            self.config.read_timeout,
            self.config.write_timeout,
        ));

        let total = {
            let mut connections = self.connections.write().await;
            connections.push(conn);
            connections.len()
        };

        tracing::info!(slot = slot, peer = %peer_addr, total = total, "Worker connected");
        self.added.notify_waiters();
    }
}

/// Registry of live worker connections
///
/// Snapshots and removals take the list lock, so callers can iterate a
/// snapshot and remove dead entries while the acceptor keeps appending.
pub struct ConnectionRegistry {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    acceptor: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ConnectionRegistry {
    /// Bind the listening socket and start accepting workers
    ///
    /// Failure to bind is a [`Error::Startup`].
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(Error::Startup)?;
        let local_addr = listener.local_addr().map_err(Error::Startup)?;
        tracing::info!(addr = %local_addr, "Listening for workers");

        let shared = Arc::new(Shared {
            config,
            connections: RwLock::new(Vec::new()),
            accepting: AtomicBool::new(true),
            next_slot: AtomicUsize::new(0),
            added: Notify::new(),
        });

        let acceptor = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { shared.accept_loop(listener).await })
        };

        Ok(Self {
            shared,
            local_addr,
            acceptor: std::sync::Mutex::new(Some(acceptor)),
            closed: AtomicBool::new(false),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry configuration
    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    /// Stop registering new connections
    ///
    /// Sockets the OS still accepts afterwards are dropped immediately.
    /// Already registered connections are unaffected.
    pub fn suspend(&self) {
        if self.shared.accepting.swap(false, Ordering::AcqRel) {
            tracing::info!("Worker acceptance suspended");
        }
    }

    /// Whether new connections are still being registered
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Point-in-time copy of the live connection list
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.shared.connections.read().await.clone()
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        self.shared.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait until at least `count` workers are connected
    ///
    /// Returns the number connected, or [`Error::Timeout`] if `timeout` elapses.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Result<usize> {
        let wait = async {
            loop {
                let added = self.shared.added.notified();
                tokio::pin!(added);
                added.as_mut().enable();

                let len = self.len().await;
                if len >= count {
                    return Ok(len);
                }
                if self.closed.load(Ordering::Acquire) {
                    return Err(Error::Registry("registry closed".into()));
                }
                added.await;
            }
        };

        tokio::time::timeout(timeout, wait).await?
    }

    /// Deregister a connection judged dead
    ///
    /// Closes the connection. Idempotent if it is no longer registered.
    pub async fn remove(&self, conn: &Arc<Connection>) {
        let removed = {
            let mut connections = self.shared.connections.write().await;
            let before = connections.len();
            connections.retain(|c| !Arc::ptr_eq(c, conn));
            before != connections.len()
        };

        conn.close();

        if removed {
            tracing::info!(
                slot = conn.slot(),
                peer = %conn.peer_addr(),
                "Worker removed"
            );
        }
    }

    /// Stop the acceptor and close every socket, including the listener
    ///
    /// Terminal; later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.accepting.store(false, Ordering::Release);
        if let Some(acceptor) = self.abort_acceptor() {
            // The listener lives in the acceptor task; it is released once
            // the aborted task has been dropped
            if let Err(e) = acceptor.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Acceptor task failed");
                }
            }
        }

        let connections = std::mem::take(&mut *self.shared.connections.write().await);
        for conn in &connections {
            conn.close();
        }
        self.shared.added.notify_waiters();

        tracing::info!(closed = connections.len(), "Registry closed");
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn abort_acceptor(&self) -> Option<JoinHandle<()>> {
        let handle = self.acceptor.lock().ok()?.take()?;
        handle.abort();
        Some(handle)
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        let _ = self.abort_acceptor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn local_config() -> RelayConfig {
        RelayConfig::with_addr("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_accepts_with_stable_slots() {
        let registry = ConnectionRegistry::bind(local_config()).await.unwrap();
        let addr = registry.local_addr();

        let _a = TcpStream::connect(addr).await.unwrap();
        registry.wait_for(1, Duration::from_secs(2)).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        registry.wait_for(2, Duration::from_secs(2)).await.unwrap();

        let slots: Vec<usize> = registry.snapshot().await.iter().map(|c| c.slot()).collect();
        assert_eq!(slots, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_suspend_rejects_new_connections() {
        let registry = ConnectionRegistry::bind(local_config()).await.unwrap();
        let addr = registry.local_addr();

        let _a = TcpStream::connect(addr).await.unwrap();
        registry.wait_for(1, Duration::from_secs(2)).await.unwrap();
        registry.suspend();
        assert!(!registry.is_accepting());

        // The OS may still complete the handshake, but the socket gets dropped
        let mut late = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), late.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::bind(local_config()).await.unwrap();
        let _a = TcpStream::connect(registry.local_addr()).await.unwrap();
        registry.wait_for(1, Duration::from_secs(2)).await.unwrap();

        let conn = registry.snapshot().await.remove(0);
        registry.remove(&conn).await;
        registry.remove(&conn).await;

        assert!(registry.is_empty().await);
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = ConnectionRegistry::bind(local_config()).await.unwrap();
        let _a = TcpStream::connect(registry.local_addr()).await.unwrap();
        registry.wait_for(1, Duration::from_secs(2)).await.unwrap();

        let snapshot = registry.snapshot().await;
        registry.remove(&snapshot[0]).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let registry = ConnectionRegistry::bind(local_config()).await.unwrap();
        let mut worker = TcpStream::connect(registry.local_addr()).await.unwrap();
        registry.wait_for(1, Duration::from_secs(2)).await.unwrap();
        let conn = registry.snapshot().await.remove(0);

        registry.close().await;
        registry.close().await;

        assert!(registry.is_closed());
        assert!(!conn.is_alive());
        assert!(registry.is_empty().await);
        drop(conn);

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), worker.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_close_releases_listening_socket() {
        let registry = ConnectionRegistry::bind(local_config()).await.unwrap();
        let addr = registry.local_addr();

        registry.close().await;

        let rebound = TcpListener::bind(addr).await.unwrap();
        assert_eq!(rebound.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_bind_failure_is_startup_error() {
        let first = ConnectionRegistry::bind(local_config()).await.unwrap();
        let taken = RelayConfig::with_addr(first.local_addr());

        let err = ConnectionRegistry::bind(taken).await.err().unwrap();
        assert!(matches!(err, Error::Startup(_)));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let registry = ConnectionRegistry::bind(local_config()).await.unwrap();

        let err = registry
            .wait_for(1, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
