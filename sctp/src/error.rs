//! SCTP error types
//!
//! Two families live here: [`SctpError`], returned synchronously by the
//! public operations, and [`ErrorKind`], the category carried by error
//! events handed to the observer.

use std::fmt;

pub type Result<T> = std::result::Result<T, SctpError>;

/// Category of an asynchronously reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A frame or chunk could not be decoded.
    ParseFailed,
    /// The peer broke a protocol rule.
    ProtocolViolation,
    /// A buffer ceiling was exceeded.
    ResourceExhaustion,
    /// A timer ran out of retries.
    RetransmissionLimitExceeded,
    /// The local user closed the association.
    UserAbort,
    /// The peer aborted the association.
    PeerAbort,
    /// The peer sent an ERROR chunk.
    PeerReported,
    /// The operation requires an established association.
    NotConnected,
    /// The operation is not valid in the current state.
    WrongSequence,
    /// The peer sent a chunk type that is not understood.
    UnrecognizedChunk,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParseFailed => "PARSE_FAILED",
            ErrorKind::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorKind::ResourceExhaustion => "RESOURCE_EXHAUSTION",
            ErrorKind::RetransmissionLimitExceeded => "TOO_MANY_RETRIES",
            ErrorKind::UserAbort => "USER_ABORT",
            ErrorKind::PeerAbort => "PEER_ABORT",
            ErrorKind::PeerReported => "PEER_REPORTED",
            ErrorKind::NotConnected => "NOT_CONNECTED",
            ErrorKind::WrongSequence => "WRONG_SEQUENCE",
            ErrorKind::UnrecognizedChunk => "UNRECOGNIZED_CHUNK",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned directly by association operations.
#[derive(Debug)]
pub enum SctpError {
    NotConnected,
    ShuttingDown,
    MessageEmpty,
    MessageTooLarge { size: usize, max: usize },
    InvalidStream(u16),
    ResourceExhaustion(String),
    InvalidPacket(String),
    InvalidConfig(String),
    Io(std::io::Error),
    Logging(logging::LoggingError),
}

impl SctpError {
    /// Event category matching this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SctpError::NotConnected => ErrorKind::NotConnected,
            SctpError::ShuttingDown => ErrorKind::WrongSequence,
            SctpError::MessageEmpty
            | SctpError::MessageTooLarge { .. }
            | SctpError::InvalidStream(_)
            | SctpError::InvalidConfig(_) => ErrorKind::ProtocolViolation,
            SctpError::ResourceExhaustion(_) => ErrorKind::ResourceExhaustion,
            SctpError::InvalidPacket(_) => ErrorKind::ParseFailed,
            SctpError::Io(_) | SctpError::Logging(_) => ErrorKind::ResourceExhaustion,
        }
    }
}

impl fmt::Display for SctpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SctpError::NotConnected => write!(f, "Association is not connected"),
            SctpError::ShuttingDown => write!(f, "Association is shutting down"),
            SctpError::MessageEmpty => write!(f, "Message payload is empty"),
            SctpError::MessageTooLarge { size, max } => {
                write!(f, "Message of {} bytes exceeds maximum of {}", size, max)
            }
            SctpError::InvalidStream(id) => write!(f, "Invalid stream identifier: {}", id),
            SctpError::ResourceExhaustion(msg) => write!(f, "Resource exhaustion: {}", msg),
            SctpError::InvalidPacket(msg) => write!(f, "Invalid packet: {}", msg),
            SctpError::InvalidConfig(msg) => write!(f, "Config error: {}", msg),
            SctpError::Io(err) => write!(f, "I/O error: {}", err),
            SctpError::Logging(err) => write!(f, "Logging error: {}", err),
        }
    }
}

impl std::error::Error for SctpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SctpError::Io(err) => Some(err),
            SctpError::Logging(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SctpError {
    fn from(err: std::io::Error) -> Self {
        SctpError::Io(err)
    }
}

impl From<logging::LoggingError> for SctpError {
    fn from(err: logging::LoggingError) -> Self {
        SctpError::Logging(err)
    }
}
