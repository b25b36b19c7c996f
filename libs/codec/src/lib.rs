//! # txlink Codec
//!
//! Collaborator contracts for the txlink connection engine:
//!
//! - [`Message`] / [`MessageCodec`]: read and write correlation fields, pack
//!   and unpack payloads
//! - [`LengthHeader`]: the length prefix that frames each payload on a stream
//!
//! ## Architecture Role
//!
//! ```text
//! caller message → [codec: pack + header] → client writer → socket
//! socket → client reader → [codec: header + unpack] → caller
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket handling, correlation or connection lifecycle (belongs in txlink-client)
//! - Network-specific data dictionaries; [`FieldMessage`] only models text fields

pub mod error;
pub mod field;
pub mod header;
pub mod message;

pub use error::CodecError;
pub use field::{FieldCodec, FieldMessage};
pub use header::{Ascii4Header, Binary2Header, Binary4Header, LengthHeader, VmlHeader};
pub use message::{FieldId, Message, MessageCodec, RRN_FIELD, STAN_FIELD};
