//! Field-map message and its TLV codec
//!
//! Reference message implementation used by the client tests and by
//! deployments that only need text fields.
//!
//! ## Wire Layout
//!
//! ```text
//! ┌──────────┬─────────────────────────────────────────────┐
//! │ MTI (4B) │ field records, ascending id                 │
//! │ ascii    │ [id: u16 BE][len: u16 BE][value: len bytes] │
//! └──────────┴─────────────────────────────────────────────┘
//! ```

use crate::{CodecError, FieldId, Message, MessageCodec};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

const MTI_LEN: usize = 4;
const RECORD_HEADER_LEN: usize = 4;

/// Message type indicator plus an ordered map of text fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldMessage {
    mti: String,
    fields: BTreeMap<FieldId, String>,
}

impl FieldMessage {
    /// Create a message with the given message type indicator
    pub fn new(mti: impl Into<String>) -> Self {
        Self {
            mti: mti.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, id: FieldId, value: impl Into<String>) -> Self {
        self.fields.insert(id, value.into());
        self
    }

    pub fn mti(&self) -> &str {
        &self.mti
    }

    pub fn field(&self, id: FieldId) -> Option<&str> {
        self.fields.get(&id).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &str)> {
        self.fields.iter().map(|(id, value)| (*id, value.as_str()))
    }
}

impl Message for FieldMessage {
    fn get_field(&self, id: FieldId) -> Result<String, CodecError> {
        Ok(self.fields.get(&id).cloned().unwrap_or_default())
    }

    fn set_field(&mut self, id: FieldId, value: &str) -> Result<(), CodecError> {
        if value.len() > u16::MAX as usize {
            return Err(CodecError::invalid_field(
                id,
                format!("value of {} bytes exceeds 65535", value.len()),
            ));
        }
        self.fields.insert(id, value.to_string());
        Ok(())
    }
}

/// TLV codec for [`FieldMessage`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldCodec;

impl MessageCodec for FieldCodec {
    type Message = FieldMessage;

    fn pack(&self, message: &FieldMessage) -> Result<Bytes, CodecError> {
        if message.mti.len() != MTI_LEN || !message.mti.is_ascii() {
            return Err(CodecError::InvalidMti {
                mti: message.mti.clone(),
                reason: "expected 4 ascii characters".to_string(),
            });
        }

        let body: usize = message
            .fields
            .values()
            .map(|value| RECORD_HEADER_LEN + value.len())
            .sum();
        let mut buf = BytesMut::with_capacity(MTI_LEN + body);
        buf.put_slice(message.mti.as_bytes());

        for (id, value) in &message.fields {
            if value.len() > u16::MAX as usize {
                return Err(CodecError::invalid_field(*id, "value longer than 65535 bytes"));
            }
            buf.put_u16(*id);
            buf.put_u16(value.len() as u16);
            buf.put_slice(value.as_bytes());
        }

        Ok(buf.freeze())
    }

    fn unpack(&self, raw: &[u8]) -> Result<FieldMessage, CodecError> {
        if raw.len() < MTI_LEN {
            return Err(CodecError::message_too_small(MTI_LEN, raw.len(), "message type indicator"));
        }
        let mti = std::str::from_utf8(&raw[..MTI_LEN])
            .ok()
            .filter(|mti| mti.is_ascii())
            .ok_or_else(|| CodecError::InvalidMti {
                mti: String::from_utf8_lossy(&raw[..MTI_LEN]).into_owned(),
                reason: "not ascii".to_string(),
            })?;

        let mut message = FieldMessage::new(mti);
        let mut offset = MTI_LEN;

        while offset < raw.len() {
            let remaining = raw.len() - offset;
            if remaining < RECORD_HEADER_LEN {
                return Err(CodecError::message_too_small(
                    RECORD_HEADER_LEN,
                    remaining,
                    format!("field record header at offset {}", offset),
                ));
            }

            let id = BigEndian::read_u16(&raw[offset..]);
            let len = BigEndian::read_u16(&raw[offset + 2..]) as usize;
            let start = offset + RECORD_HEADER_LEN;

            if raw.len() - start < len {
                return Err(CodecError::TruncatedField {
                    field: id,
                    offset,
                    need: len,
                    remaining: raw.len() - start,
                });
            }

            let value = std::str::from_utf8(&raw[start..start + len])
                .map_err(|e| CodecError::invalid_field(id, e.to_string()))?;

            if message.fields.insert(id, value.to_string()).is_some() {
                return Err(CodecError::DuplicateField { field: id, offset });
            }

            offset = start + len;
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::STAN_FIELD;

    #[test]
    fn test_pack_layout() {
        let message = FieldMessage::new("0800").with_field(STAN_FIELD, "000123");
        let packed = FieldCodec.pack(&message).unwrap();

        assert_eq!(&packed[..4], b"0800");
        assert_eq!(&packed[4..8], &[0x00, 0x0B, 0x00, 0x06]);
        assert_eq!(&packed[8..], b"000123");
        assert_eq!(FieldCodec.unpack(&packed).unwrap(), message);
    }

    #[test]
    fn test_absent_field_reads_empty() {
        let message = FieldMessage::new("0200");
        assert_eq!(message.get_field(STAN_FIELD).unwrap(), "");
    }

    #[test]
    fn test_unpack_truncated_value() {
        let mut raw = b"0810".to_vec();
        raw.extend_from_slice(&[0x00, 0x0B, 0x00, 0x06]);
        raw.extend_from_slice(b"0001");

        let err = FieldCodec.unpack(&raw).unwrap_err();
        assert_eq!(
            err,
            CodecError::TruncatedField {
                field: 11,
                offset: 4,
                need: 6,
                remaining: 4
            }
        );
    }

    #[test]
    fn test_unpack_duplicate_field() {
        let mut raw = b"0810".to_vec();
        for _ in 0..2 {
            raw.extend_from_slice(&[0x00, 0x0B, 0x00, 0x01]);
            raw.push(b'1');
        }
        assert!(matches!(
            FieldCodec.unpack(&raw),
            Err(CodecError::DuplicateField { field: 11, offset: 9 })
        ));
    }

    #[test]
    fn test_unpack_dangling_record_header() {
        let raw = b"0810\x00\x0B";
        assert!(matches!(
            FieldCodec.unpack(raw),
            Err(CodecError::MessageTooSmall { need: 4, got: 2, .. })
        ));
    }

    #[test]
    fn test_pack_rejects_bad_mti() {
        let message = FieldMessage::new("08");
        assert!(matches!(
            FieldCodec.pack(&message),
            Err(CodecError::InvalidMti { .. })
        ));
        assert!(FieldCodec.unpack(b"08").is_err());
    }
}
