//! Error types
//!
//! Connection-scoped failures (closure, protocol violations, timeouts) are
//! recovered by removing the offending connection. Only `Startup` is fatal.

use std::fmt;
use std::io;

use crate::stats::metrics::DispatchStats;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket I/O failure
    Io(io::Error),
    /// Peer closed the connection in the middle of a message
    ConnectionClosed,
    /// Peer sent bytes that violate the wire format
    Protocol(ProtocolError),
    /// Bind or listen failed before any processing began
    Startup(io::Error),
    /// Every worker slot has been retired
    ///
    /// Carries the counters of the session up to that point.
    NoWorkers { stats: Box<DispatchStats> },
    /// A configured read or connect timeout elapsed
    Timeout,
    /// Registry misuse (e.g. operating on a closed registry)
    Registry(String),
}

/// Wire format violations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Declared frame length exceeds the configured maximum
    FrameTooLarge { len: usize, max: usize },
    /// A result set cannot carry more than 255 detections
    TooManyDetections(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::ConnectionClosed => write!(f, "Connection closed by peer"),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Startup(e) => write!(f, "Startup failed: {}", e),
            Error::NoWorkers { stats } => write!(
                f,
                "No workers available ({} of {} frames completed)",
                stats.frames_completed, stats.frames_dispatched
            ),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Registry(msg) => write!(f, "Registry error: {}", msg),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::FrameTooLarge { len, max } => {
                write!(f, "Frame length {} exceeds maximum {}", len, max)
            }
            ProtocolError::TooManyDetections(n) => {
                write!(f, "Result set has {} detections (max 255)", n)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::Startup(e) => Some(e),
            Error::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(e)
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl Error {
    /// Whether this error means the peer is gone (as opposed to misbehaving)
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
