use std::{error::Error, fmt, io};

use comms::SendErr;
use safetensors::SafeTensorError;

/// The server module's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Failures reading or writing a weights checkpoint.
#[derive(Debug)]
pub enum CheckpointErr {
    Io(io::Error),
    Format(SafeTensorError),
    /// The file is a valid safetensors file but not a weights checkpoint.
    Layout(String),
}

impl fmt::Display for CheckpointErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "checkpoint io error: {e}"),
            Self::Format(e) => write!(f, "checkpoint format error: {e:?}"),
            Self::Layout(detail) => write!(f, "checkpoint layout error: {detail}"),
        }
    }
}

impl Error for CheckpointErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckpointErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for CheckpointErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Format(value)
    }
}

/// Failures while feeding a contribution to the coordinator.
#[derive(Debug)]
pub enum AggregationErr {
    /// The contribution doesn't have the layout of the global weights.
    ShapeMismatch {
        expected: Vec<Vec<usize>>,
        got: Vec<Vec<usize>>,
    },
    /// The round was aggregated but couldn't be persisted.
    Checkpoint(CheckpointErr),
}

impl fmt::Display for AggregationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { expected, got } => {
                write!(f, "contribution shape mismatch: got {got:?}, expected {expected:?}")
            }
            Self::Checkpoint(e) => write!(f, "{e}"),
        }
    }
}

impl Error for AggregationErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Checkpoint(e) => Some(e),
            Self::ShapeMismatch { .. } => None,
        }
    }
}

impl From<CheckpointErr> for AggregationErr {
    fn from(value: CheckpointErr) -> Self {
        Self::Checkpoint(value)
    }
}

/// Failures that stop the whole coordinator.
///
/// Errors of a single peer never end up here, they only close that peer.
#[derive(Debug)]
pub enum ServerErr {
    Io(io::Error),
    /// The listening socket failed, no new participant can join.
    Listener(io::Error),
    Config(String),
    Checkpoint(CheckpointErr),
    /// The global state can't be framed, usually a header too narrow for the model.
    Encode(SendErr),
}

impl fmt::Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Listener(e) => write!(f, "listener failed: {e}"),
            Self::Config(detail) => write!(f, "invalid config: {detail}"),
            Self::Checkpoint(e) => write!(f, "{e}"),
            Self::Encode(e) => write!(f, "can't encode the global state: {e}"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) | Self::Listener(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Config(_) => None,
        }
    }
}

impl From<io::Error> for ServerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CheckpointErr> for ServerErr {
    fn from(value: CheckpointErr) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<SendErr> for ServerErr {
    fn from(value: SendErr) -> Self {
        Self::Encode(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ServerErr> for io::Error {
    fn from(value: ServerErr) -> Self {
        match value {
            ServerErr::Io(e) | ServerErr::Listener(e) => e,
            other => io::Error::other(other),
        }
    }
}
