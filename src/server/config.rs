//! Dispatcher-side configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::media::frame::Size;
use crate::protocol::constants::*;

/// Dispatcher configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on for worker connections
    pub bind_addr: SocketAddr,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Maximum accepted frame payload length
    pub max_frame_len: usize,

    /// Give up on a worker if a result takes longer than this (None = wait forever)
    pub read_timeout: Option<Duration>,

    /// Give up on a worker if sending a frame takes longer than this (None = wait forever)
    pub write_timeout: Option<Duration>,

    /// Resolution frames are resized to before dispatch
    pub inference_size: Size,

    /// Minimum time between periodic latency reports
    pub report_interval: Duration,

    /// Optional label file used when annotating output
    pub labels_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            tcp_nodelay: true, // Important for low latency
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_timeout: None,
            write_timeout: None,
            inference_size: Size::new(DEFAULT_INFERENCE_DIM, DEFAULT_INFERENCE_DIM),
            report_interval: Duration::from_secs(10),
            labels_path: None,
        }
    }
}

impl RelayConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Listen on all interfaces at `port`
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the maximum frame payload length
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Set the result read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the frame write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the inference input resolution
    pub fn inference_size(mut self, size: Size) -> Self {
        self.inference_size = size;
        self
    }

    /// Set the periodic report interval
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Set the label file path
    pub fn labels_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.labels_path = Some(path.into());
        self
    }
}
