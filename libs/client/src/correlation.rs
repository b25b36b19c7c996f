//! Correlation key derivation
//!
//! Requests and replies are paired by a key read out of the message itself.
//! The default is the STAN field alone; networks that reuse STANs inside a
//! day pair on several fields instead (RRN + STAN, terminal + STAN, ...).

use crate::{ClientError, Result};
use txlink_codec::{FieldId, Message, STAN_FIELD};

/// Derives the correlation key of a request or reply
pub trait CorrelationPolicy<M: Message>: Send + Sync + 'static {
    fn derive_key(&self, message: &M) -> Result<String>;
}

fn read_component<M: Message>(message: &M, field: FieldId) -> Result<String> {
    let value = message.get_field(field).map_err(|e| {
        ClientError::correlation_with_source(format!("reading field {}", field), e)
    })?;
    if value.is_empty() {
        return Err(ClientError::correlation(format!(
            "field {} is empty",
            field
        )));
    }
    Ok(value)
}

/// Key is the text of a single field
#[derive(Debug, Clone, Copy)]
pub struct FieldKey {
    pub field: FieldId,
}

impl FieldKey {
    pub fn new(field: FieldId) -> Self {
        Self { field }
    }
}

impl Default for FieldKey {
    fn default() -> Self {
        Self::new(STAN_FIELD)
    }
}

impl<M: Message> CorrelationPolicy<M> for FieldKey {
    fn derive_key(&self, message: &M) -> Result<String> {
        read_component(message, self.field)
    }
}

/// Key is several fields joined by a separator; every component must be present
#[derive(Debug, Clone)]
pub struct CompositeKey {
    fields: Vec<FieldId>,
    separator: String,
}

impl CompositeKey {
    pub fn new(fields: impl Into<Vec<FieldId>>) -> Self {
        Self {
            fields: fields.into(),
            separator: "|".to_string(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

impl<M: Message> CorrelationPolicy<M> for CompositeKey {
    fn derive_key(&self, message: &M) -> Result<String> {
        if self.fields.is_empty() {
            return Err(ClientError::correlation("composite key has no fields"));
        }
        let parts = self
            .fields
            .iter()
            .map(|field| read_component(message, *field))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(&self.separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txlink_codec::{FieldMessage, RRN_FIELD};

    #[test]
    fn test_field_key_reads_stan() {
        let message = FieldMessage::new("0200").with_field(STAN_FIELD, "000123");
        assert_eq!(FieldKey::default().derive_key(&message).unwrap(), "000123");
    }

    #[test]
    fn test_field_key_empty_is_correlation_failure() {
        let message = FieldMessage::new("0200");
        let err = FieldKey::default().derive_key(&message).unwrap_err();
        assert!(matches!(err, ClientError::CorrelationFailure { .. }));
    }

    #[test]
    fn test_composite_key() {
        let message = FieldMessage::new("0200")
            .with_field(STAN_FIELD, "000123")
            .with_field(RRN_FIELD, "612345678901");
        let policy = CompositeKey::new(vec![RRN_FIELD, STAN_FIELD]).with_separator(":");
        assert_eq!(policy.derive_key(&message).unwrap(), "612345678901:000123");

        let partial = FieldMessage::new("0200").with_field(STAN_FIELD, "000123");
        assert!(policy.derive_key(&partial).is_err());
    }
}
