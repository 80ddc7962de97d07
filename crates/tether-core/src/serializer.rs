//! Message serializer contract.
//!
//! The client never picks a wire format itself. A serializer is injected at
//! construction (defaulting to [`JsonSerializer`]) and replaced by the
//! channel's own serializer when a channel is attached.

use crate::error::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes and decodes message payloads.
///
/// Implementations work on `serde_json::Value` so the trait stays object
/// safe; typed access goes through [`serialize`](dyn Serializer::serialize)
/// and [`deserialize`](dyn Serializer::deserialize).
pub trait Serializer: Send + Sync + 'static {
    /// Short format name, e.g. `"json"`.
    fn name(&self) -> &'static str;

    fn encode(&self, value: &serde_json::Value) -> Result<Bytes>;

    fn decode(&self, payload: &[u8]) -> Result<serde_json::Value>;
}

impl dyn Serializer {
    /// Encode a typed message.
    pub fn serialize<T: Serialize + ?Sized>(&self, message: &T) -> Result<Bytes> {
        let value = serde_json::to_value(message)?;
        self.encode(&value)
    }

    /// Decode a typed message.
    pub fn deserialize<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        let value = self.decode(payload)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// JSON serializer, the default for new clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode(&self, payload: &[u8]) -> Result<serde_json::Value> {
        // An empty payload is a message with no fields.
        if payload.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        name: String,
        count: u32,
    }

    #[test]
    fn test_typed_messages_through_trait_object() {
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let message = Greeting {
            name: "ada".into(),
            count: 3,
        };

        let payload = serializer.serialize(&message).unwrap();
        assert_eq!(&payload[..], br#"{"count":3,"name":"ada"}"#);
        assert_eq!(serializer.deserialize::<Greeting>(&payload).unwrap(), message);
    }

    #[test]
    fn test_empty_payload_decodes_as_unit() {
        let serializer: &dyn Serializer = &JsonSerializer;
        serializer.deserialize::<()>(b"").unwrap();
    }

    #[test]
    fn test_malformed_payload_is_serialization_error() {
        let serializer: &dyn Serializer = &JsonSerializer;
        let err = serializer.deserialize::<Greeting>(b"{oops").unwrap_err();
        assert!(matches!(err, RpcError::Serialization { .. }));
    }
}
