//! # Error Definitions
//!
//! Protocol failures (a frame or body could not be produced or understood) and
//! the faults a servicing peer reports back to a caller.

use serde::Deserialize;
use serde::Serialize;

/// Failures of the protocol layer itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A frame or body could not be serialized.
    Encode(String),
    /// A frame or body could not be deserialized.
    Decode(String),
    /// A body arrived with a content type other than the serialized object type.
    UnexpectedContentType(Option<String>),
    /// A required header was absent.
    MissingHeader(&'static str),
    /// A header was present but its value could not be parsed.
    InvalidHeader { name: &'static str, value: String },
    /// The frame was well formed but inconsistent (e.g. argument count mismatch).
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "encode failed: {}", msg),
            Self::Decode(msg) => write!(f, "decode failed: {}", msg),
            Self::UnexpectedContentType(Some(ty)) => write!(f, "unexpected content type '{}'", ty),
            Self::UnexpectedContentType(None) => write!(f, "missing content type"),
            Self::MissingHeader(name) => write!(f, "missing header '{}'", name),
            Self::InvalidHeader { name, value } => write!(f, "invalid value '{}' for header '{}'", value, name),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An application-level error raised by a target method.
///
/// Crosses the wire unchanged so the caller can re-raise it with the same
/// `kind` and `message`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppError {
    pub kind: String,
    pub message: String,
}

impl AppError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

/// The body of a non-200 response.
///
/// These are distinct from `Error`: a `Fault` is the *remote* side failing to
/// service a call, whereas `Error` is the protocol itself failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    /// The target method raised an application error.
    Application(AppError),
    /// No object is registered under `id` on the servicing side.
    TargetNotFound { id: u64, method: String },
    /// The servicing side failed for reasons unrelated to the application.
    Internal(String),
    /// The request could not be parsed into an invocation.
    BadRequest(String),
}

impl Fault {
    /// The response status this fault is sent with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Application(_) | Self::Internal(_) => crate::frame::STATUS_ERROR,
            Self::TargetNotFound { .. } => crate::frame::STATUS_NOT_FOUND,
            Self::BadRequest(_) => crate::frame::STATUS_BAD_REQUEST,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application(e) => write!(f, "application error: {}", e),
            Self::TargetNotFound { id, method } => {
                write!(f, "could not invoke '{}': target {} not found", method, id)
            }
            Self::Internal(msg) => write!(f, "internal fault: {}", msg),
            Self::BadRequest(msg) => write!(f, "bad request: {}", msg),
        }
    }
}
