use std::{error::Error, fmt, io};

/// Failures on the receiving end of a framed stream.
#[derive(Debug)]
pub enum RecvErr {
    /// The peer closed the stream, or reading from it failed.
    PeerDisconnected(Option<io::Error>),
    /// The length header couldn't be parsed.
    Framing(String),
    /// The payload isn't a valid encoding of the expected schema.
    Deserialization(serde_json::Error),
}

impl RecvErr {
    /// Whether this error means the peer is gone rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::PeerDisconnected(_))
    }
}

impl fmt::Display for RecvErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerDisconnected(None) => f.write_str("peer disconnected"),
            Self::PeerDisconnected(Some(e)) => write!(f, "peer disconnected: {e}"),
            Self::Framing(detail) => write!(f, "framing error: {detail}"),
            Self::Deserialization(e) => write!(f, "deserialization error: {e}"),
        }
    }
}

impl Error for RecvErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::PeerDisconnected(Some(e)) => Some(e),
            Self::Deserialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RecvErr {
    fn from(value: io::Error) -> Self {
        Self::PeerDisconnected(Some(value))
    }
}

/// Failures on the sending end of a framed stream.
#[derive(Debug)]
pub enum SendErr {
    Io(io::Error),
    Serialization(serde_json::Error),
    /// The serialized payload needs more digits than the header can hold.
    Oversized { len: usize, header_len: usize },
}

impl fmt::Display for SendErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Oversized { len, header_len } => write!(
                f,
                "payload of {len} bytes doesn't fit in a {header_len} digit header"
            ),
        }
    }
}

impl Error for SendErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialization(e) => Some(e),
            Self::Oversized { .. } => None,
        }
    }
}

impl From<io::Error> for SendErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SendErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<RecvErr> for io::Error {
    fn from(value: RecvErr) -> Self {
        match value {
            RecvErr::PeerDisconnected(Some(e)) => e,
            RecvErr::PeerDisconnected(None) => io::Error::from(io::ErrorKind::UnexpectedEof),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<SendErr> for io::Error {
    fn from(value: SendErr) -> Self {
        match value {
            SendErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}
