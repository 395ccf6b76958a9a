//! Call failures as a caller sees them.

use duorpc::AppError;
use duorpc::Fault;

use crate::transport;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The target raised an application error; re-raised here unchanged.
    Application(AppError),
    /// The peer has no object registered under `id`.
    TargetNotFound { id: u64, method: String },
    /// The peer answered with a failure status and no application error.
    Remote { status: u16, message: Option<String> },
    /// The connection was closed or torn down while the call was outstanding.
    ConnectionClosed,
    /// No response arrived within the configured response timeout.
    Timeout,
    Transport(transport::Error),
    Protocol(duorpc::Error),
    /// Argument `index` is an object that may not cross the wire by reference here.
    NotSerializable { method: String, index: usize },
    /// The argument list does not match the declared parameters.
    ArgumentMismatch { method: String, expected: usize, found: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application(e) => write!(f, "Application error: {}", e),
            Self::TargetNotFound { id, method } => {
                write!(f, "Could not invoke '{}': target object-{} not found", method, id)
            }
            Self::Remote { status, message: Some(msg) } => write!(f, "Remote failure ({}): {}", status, msg),
            Self::Remote { status, message: None } => write!(f, "Remote failure with status {}", status),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Response timed out"),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Protocol(e) => write!(f, "Protocol error: {}", e),
            Self::NotSerializable { method, index } => {
                write!(f, "Argument {} of '{}' is an object and cannot be sent by reference", index, method)
            }
            Self::ArgumentMismatch { method, expected, found } => {
                write!(f, "'{}' takes {} arguments, {} given", method, expected, found)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<duorpc::Error> for Error {
    fn from(e: duorpc::Error) -> Self {
        Self::Protocol(e)
    }
}

impl Error {
    /// Rebuilds the caller-side error from the fault a servicing peer sent.
    pub(crate) fn from_fault(status: u16, fault: Fault) -> Self {
        match fault {
            Fault::Application(e) => Self::Application(e),
            Fault::TargetNotFound { id, method } => Self::TargetNotFound { id, method },
            Fault::Internal(msg) | Fault::BadRequest(msg) => Self::Remote {
                status,
                message: Some(msg),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
