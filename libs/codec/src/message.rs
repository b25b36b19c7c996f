//! Message and codec contracts
//!
//! The connection engine never looks inside a message. It needs to read and
//! write a handful of text fields (the correlation fields) and to turn a
//! message into payload bytes and back.

use crate::CodecError;
use bytes::Bytes;

/// Numeric field identifier (data element number)
pub type FieldId = u16;

/// System trace audit number field
pub const STAN_FIELD: FieldId = 11;

/// Retrieval reference number field
pub const RRN_FIELD: FieldId = 37;

/// A structured request or reply
pub trait Message: Send + 'static {
    /// Read a field as text; an absent field reads as an empty string
    fn get_field(&self, id: FieldId) -> Result<String, CodecError>;

    /// Set a field from text
    fn set_field(&mut self, id: FieldId, value: &str) -> Result<(), CodecError>;
}

/// Packs messages into payload bytes and unpacks them again
pub trait MessageCodec: Send + Sync + 'static {
    type Message: Message;

    fn pack(&self, message: &Self::Message) -> Result<Bytes, CodecError>;

    fn unpack(&self, raw: &[u8]) -> Result<Self::Message, CodecError>;
}
