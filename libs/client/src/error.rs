//! Client Error Types
//!
//! Per-request failures reach only the caller that issued the request;
//! connection-wide failures reach every outstanding caller as
//! [`ClientError::ConnectionClosed`].

use std::sync::Arc;
use thiserror::Error;
use txlink_codec::CodecError;

/// Main client error type
///
/// `Clone` because the outcome of closing a connection is handed to every
/// `close()` caller, and I/O sources are therefore shared behind `Arc`.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Connection is draining or closed; no I/O was attempted for this request
    #[error("connection closed")]
    ConnectionClosed,

    /// Establishing the transport failed
    #[error("connecting to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Writing the request frame to the transport failed
    #[error("write failure for request {key}: {source}")]
    WriteFailure {
        key: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Malformed or short length header on the inbound stream
    #[error("framing failure: {message}")]
    FramingFailure {
        message: String,
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// Length header was unreadable or announced an unacceptable length
    #[error("framing failure: {0}")]
    InvalidLengthHeader(#[source] CodecError),

    /// Inbound payload could not be decoded
    #[error("decode failure: {0}")]
    DecodeFailure(#[source] CodecError),

    /// Outbound message could not be packed or framed
    #[error("encode failure: {0}")]
    EncodeFailure(#[source] CodecError),

    /// Correlation field missing or unreadable
    #[error("correlation failure: {message}")]
    CorrelationFailure {
        message: String,
        #[source]
        source: Option<CodecError>,
    },

    /// Another outstanding request already holds this correlation key
    #[error("correlation key {key} already has a pending request")]
    DuplicateKey { key: String },

    /// No reply arrived within the caller's deadline
    #[error("request {key} timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    /// Error raised while shutting the transport down
    #[error("I/O error: {message}: {source}")]
    Io {
        message: String,
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn connect(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connect {
            address: address.into(),
            source: Arc::new(source),
        }
    }

    pub fn write_failure(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::WriteFailure {
            key: key.into(),
            source: Arc::new(source),
        }
    }

    pub fn framing_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::FramingFailure {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn correlation(message: impl Into<String>) -> Self {
        Self::CorrelationFailure {
            message: message.into(),
            source: None,
        }
    }

    pub fn correlation_with_source(message: impl Into<String>, source: CodecError) -> Self {
        Self::CorrelationFailure {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// True for errors that mean the whole connection is gone
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failure_formatting() {
        let err = ClientError::write_failure(
            "000042",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"),
        );
        let display = err.to_string();
        assert!(display.contains("000042"));
        assert!(display.contains("pipe closed"));
        assert!(!err.is_connection_closed());
    }

    #[test]
    fn test_invalid_length_header_keeps_codec_source() {
        let err = ClientError::InvalidLengthHeader(CodecError::invalid_header(
            &[0x00, 0x04, 0xAB, 0xCD],
            "reserved bytes not zero",
        ));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("0x0004abcd"));
        assert!(err.to_string().starts_with("framing failure"));
    }

    #[test]
    fn test_clone_shares_io_source() {
        let err = ClientError::io(
            "shutting down transport",
            std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected"),
        );
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(std::error::Error::source(&cloned).is_some());
    }
}
