//! Unified error types for livehub

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all engine operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// AMF0 encoding/decoding error
    Amf(AmfError),
    /// FLV byte-stream framing error
    Flv(FlvError),
    /// RTMP chunk-stream protocol violation
    Protocol(ProtocolError),
    /// Publish/play rejected by the broadcast hub
    Broadcast(BroadcastError),
    /// Connection was closed
    ConnectionClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Flv(e) => write!(f, "FLV error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Broadcast(e) => write!(f, "Broadcast error: {}", e),
            Error::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<FlvError> for Error {
    fn from(err: FlvError) -> Self {
        Error::Flv(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<BroadcastError> for Error {
    fn from(err: BroadcastError) -> Self {
        Error::Broadcast(err)
    }
}

/// AMF0 encoding/decoding errors
///
/// An unsupported marker is fatal to the connection: continuing past it
/// would desynchronize the byte stream.
#[derive(Debug)]
pub enum AmfError {
    /// Unknown or unimplemented type marker byte
    UnsupportedType(u8),
    /// Buffer ended inside a value
    UnexpectedEof,
    /// String bytes were not valid UTF-8
    InvalidUtf8,
    /// Typed-object values cannot be encoded
    TypedObjectEncoding,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnsupportedType(m) => write!(f, "Unsupported AMF0 marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF0 data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF0 string"),
            AmfError::TypedObjectEncoding => {
                write!(f, "Typed object encoding is not implemented")
            }
        }
    }
}

impl std::error::Error for AmfError {}

/// FLV framing and tag-classification errors
#[derive(Debug)]
pub enum FlvError {
    /// Trailing previous-tag-size field did not match the tag just read
    TagSizeMismatch { expected: u32, actual: u32 },
    /// Tag payload too short for its declared codec framing
    TruncatedTag,
}

impl fmt::Display for FlvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlvError::TagSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "FLV previous tag size mismatch: expected {}, got {}",
                    expected, actual
                )
            }
            FlvError::TruncatedTag => write!(f, "Truncated FLV tag payload"),
        }
    }
}

impl std::error::Error for FlvError {}

/// RTMP chunk-stream errors
#[derive(Debug)]
pub enum ProtocolError {
    /// Declared message length exceeds the sanity limit
    MessageTooLarge { size: u32, max: u32 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Broadcast hub rejections
///
/// These reject a single publish/play request; the connection itself may
/// continue (transport adapters typically close it anyway).
#[derive(Debug)]
pub enum BroadcastError {
    /// Auth token missing, malformed, expired or signature mismatch
    AuthFailed { path: String },
    /// The stream path already has a publisher
    AlreadyPublishing { path: String },
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastError::AuthFailed { path } => {
                write!(f, "stream {} authentication verification failed", path)
            }
            BroadcastError::AlreadyPublishing { path } => {
                write!(f, "streamPath={} already has a publisher", path)
            }
        }
    }
}

impl std::error::Error for BroadcastError {}
