use std::fmt;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{FrameError, Result};

/// Application message codec plugged into the decoder and the send path.
pub trait MessageCodec: Send + Sync + 'static {
    /// Decoded message type.
    type Message: Send + 'static;

    fn encode(&self, message: &Self::Message) -> Result<Bytes>;

    fn decode(&self, payload: &[u8]) -> Result<Self::Message>;
}

/// Value of a message's routing field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicKey {
    Name(String),
    Id(i64),
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKey::Name(name) => f.write_str(name),
            TopicKey::Id(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for TopicKey {
    fn from(value: &str) -> Self {
        TopicKey::Name(value.to_string())
    }
}

impl From<String> for TopicKey {
    fn from(value: String) -> Self {
        TopicKey::Name(value)
    }
}

impl From<i64> for TopicKey {
    fn from(value: i64) -> Self {
        TopicKey::Id(value)
    }
}

impl From<u16> for TopicKey {
    fn from(value: u16) -> Self {
        TopicKey::Id(i64::from(value))
    }
}

/// Messages that carry a routing field.
pub trait TopicField {
    /// Read the topic stored under `field`, if present and routable.
    fn topic(&self, field: &str) -> Option<TopicKey>;
}

impl TopicField for Value {
    fn topic(&self, field: &str) -> Option<TopicKey> {
        match self.get(field)? {
            Value::String(name) => Some(TopicKey::Name(name.clone())),
            Value::Number(number) => number.as_i64().map(TopicKey::Id),
            _ => None,
        }
    }
}

impl TopicField for Bytes {
    fn topic(&self, _field: &str) -> Option<TopicKey> {
        None
    }
}

/// JSON payloads, decoded to [`serde_json::Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    type Message = Value;

    fn encode(&self, message: &Value) -> Result<Bytes> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|err| FrameError::Encode(err.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Value> {
        serde_json::from_slice(payload).map_err(|err| FrameError::Decode(err.to_string()))
    }
}

/// Payloads passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl MessageCodec for RawCodec {
    type Message = Bytes;

    fn encode(&self, message: &Bytes) -> Result<Bytes> {
        Ok(message.clone())
    }

    fn decode(&self, payload: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(payload))
    }
}
