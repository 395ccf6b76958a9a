//! # Transport Abstraction
//!
//! A minimal, async interface for moving frames between two peers.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about requests, headers or
//!   objects. It moves opaque, already-delimited buffers.
//! - **Full Duplex**: Either side may send at any time. Correlating responses
//!   to requests is the connection's job, not the transport's.

use std::fmt;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// The operation timed out.
    Timeout,
    /// The frame exceeds what the transport can carry.
    PayloadTooLarge(usize),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Timeout => write!(f, "Transport timed out"),
            Self::PayloadTooLarge(len) => write!(f, "Payload of {} bytes too large for transport", len),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => Self::ConnectionLost(e.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional frame pipe.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
///
/// # Invariants
/// - `send` delivers the whole buffer as one frame or fails.
/// - `recv` yields frames in the order the peer sent them.
/// - `recv` returns `Ok(None)` once the peer has closed its side.
/// - Only one task calls `recv` at a time (the connection's receive pump).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, payload: &[u8]) -> Result<()>;

    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Closes the sending half. The default does nothing.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
