//! Worker-side configuration

use std::time::Duration;

use crate::protocol::constants::{DEFAULT_MAX_FRAME_LEN, DEFAULT_PORT};

/// Worker stub configuration
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Dispatcher address (`host:port`)
    pub server_addr: String,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Maximum accepted frame payload length
    pub max_frame_len: usize,

    /// Give up connecting after this long (None = OS default)
    pub connect_timeout: Option<Duration>,

    /// Minimum time between periodic stage timing reports
    pub report_interval: Duration,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            tcp_nodelay: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            connect_timeout: None,
            report_interval: Duration::from_secs(10),
        }
    }
}

impl StubConfig {
    /// Create a config connecting to `addr`
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            server_addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set the maximum frame payload length
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the stage timing report interval
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}
