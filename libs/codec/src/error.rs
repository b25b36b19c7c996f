//! Codec-level errors for message packing and length framing
//!
//! Every variant carries enough context to tell from a log line alone which
//! collaborator failed and what it was looking at.

use thiserror::Error;

/// Errors raised by the message codec and the length-header framing codec
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Buffer ended before a complete structure could be read
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// Length header bytes could not be interpreted
    #[error("Invalid length header {header}: {reason}")]
    InvalidHeader { header: String, reason: String },

    /// Payload length cannot be represented by the header in use
    #[error("Length {length} out of range for {header} header (max {max})")]
    LengthOutOfRange {
        length: usize,
        max: usize,
        header: &'static str,
    },

    /// A field record is truncated or its declared length overruns the buffer
    #[error("Truncated field {field} at offset {offset}: need {need} bytes, {remaining} remaining")]
    TruncatedField {
        field: u16,
        offset: usize,
        need: usize,
        remaining: usize,
    },

    /// The same field id appeared twice in one payload
    #[error("Duplicate field {field} at offset {offset}")]
    DuplicateField { field: u16, offset: usize },

    /// Field value is not valid for its declared type
    #[error("Invalid value for field {field}: {reason}")]
    InvalidField { field: u16, reason: String },

    /// Message type indicator is missing or malformed
    #[error("Invalid message type indicator {mti:?}: {reason}")]
    InvalidMti { mti: String, reason: String },
}

impl CodecError {
    /// Create a MessageTooSmall error
    pub fn message_too_small(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            context: context.into(),
        }
    }

    /// Create an InvalidHeader error, rendering the raw header bytes as hex
    pub fn invalid_header(raw: &[u8], reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            header: format!("0x{}", hex::encode(raw)),
            reason: reason.into(),
        }
    }

    /// Create an InvalidField error
    pub fn invalid_field(field: u16, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
