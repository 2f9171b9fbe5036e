//! Envelope (de)serialization seam.
//!
//! Both the send-side serialization layer and the mediator depend on
//! [`EnvelopeSerializer`] rather than a concrete format. [`JsonSerializer`]
//! is the default implementation, backed by `serde_json`.

use serde::{de::DeserializeOwned, Serialize};
use tracing_error::SpanTrace;

use crate::{transport::RawPayload, Envelope};

/// Converts envelopes to and from transport payload bytes.
pub trait EnvelopeSerializer<M> {
    /// Serialize an envelope into a raw transport payload.
    fn serialize(&self, envelope: &Envelope<M>) -> Result<RawPayload, SerializationError>;

    /// Deserialize a raw transport payload back into an envelope.
    ///
    /// All envelope fields round-trip losslessly through
    /// `serialize`/`deserialize`.
    fn deserialize(&self, payload: &[u8]) -> Result<Envelope<M>, SerializationError>;
}

/// JSON envelope serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<M> EnvelopeSerializer<M> for JsonSerializer
where
    M: Serialize + DeserializeOwned,
{
    fn serialize(&self, envelope: &Envelope<M>) -> Result<RawPayload, SerializationError> {
        let bytes = serde_json::to_vec(envelope).map_err(SerializationError::new)?;
        Ok(RawPayload::from(bytes))
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Envelope<M>, SerializationError> {
        serde_json::from_slice(payload).map_err(SerializationError::new)
    }
}

/// Error returned when an envelope cannot be (de)serialized.
///
/// During receive, a deserialization failure is recovered locally: the
/// mediator skips the offending message, reports it through its hook, and
/// keeps the loop alive.
#[derive(Debug)]
pub struct SerializationError {
    context: SpanTrace,
    source: tower::BoxError,
}

impl SerializationError {
    /// Wrap an underlying format error.
    pub fn new(err: impl Into<tower::BoxError>) -> Self {
        Self {
            context: SpanTrace::capture(),
            source: err.into(),
        }
    }
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Serialization error: {}", self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        body: String,
    }

    #[test]
    fn json_round_trip_preserves_all_envelope_fields() {
        let envelope = Envelope::new(Note {
            body: "hello".into(),
        })
        .with_operation_id("op-1")
        .with_correlation_id(Uuid::new_v4())
        .with_contributor("tests");

        let payload = EnvelopeSerializer::serialize(&JsonSerializer, &envelope).unwrap();
        let decoded: Envelope<Note> =
            JsonSerializer.deserialize(payload.as_bytes()).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn json_round_trip_preserves_absent_metadata() {
        let envelope = Envelope::new(Note { body: "bare".into() });

        let payload = EnvelopeSerializer::serialize(&JsonSerializer, &envelope).unwrap();
        let decoded: Envelope<Note> =
            JsonSerializer.deserialize(payload.as_bytes()).unwrap();

        assert_eq!(decoded.operation_id, None);
        assert_eq!(decoded.correlation_id, None);
        assert_eq!(decoded.contributor, None);
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn malformed_payload_fails_with_serialization_error() {
        let result: Result<Envelope<Note>, _> =
            JsonSerializer.deserialize(b"{ not json at all");
        assert!(result.is_err());
    }
}
