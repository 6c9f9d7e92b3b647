//! Event serialization boundary.
//!
//! Converts typed domain events to opaque bytes and back, keyed by the
//! event's stable name. Two pieces cooperate:
//!
//! - [`EncodeEvent`]: implemented once per bounded context on its event sum
//!   type; encodes only the concrete variant's payload.
//! - [`EventRegistry`](crate::registry::EventRegistry): maps event names to
//!   decoders for the concrete variant types.
//!
//! [`RegistrySerializer`] combines both with an [`Encoding`] strategy. Several
//! serializers with different encodings can share one registry.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::EventRegistry;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// No decoder is registered for the name.
    #[error("unknown event name '{0}'")]
    UnknownEventName(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Wire encoding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Json,
    Bincode,
}

impl Encoding {
    pub const fn content_type(self) -> &'static str {
        match self {
            Encoding::Json => JSON_CONTENT_TYPE,
            Encoding::Bincode => BINCODE_CONTENT_TYPE,
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            JSON_CONTENT_TYPE => Some(Encoding::Json),
            BINCODE_CONTENT_TYPE => Some(Encoding::Bincode),
            _ => None,
        }
    }

    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, SerializationError> {
        match self {
            Encoding::Json => {
                serde_json::to_vec(value).map_err(|e| SerializationError::Encode(e.to_string()))
            }
            Encoding::Bincode => {
                bincode::serialize(value).map_err(|e| SerializationError::Encode(e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, SerializationError> {
        match self {
            Encoding::Json => {
                serde_json::from_slice(bytes).map_err(|e| SerializationError::Decode(e.to_string()))
            }
            Encoding::Bincode => {
                bincode::deserialize(bytes).map_err(|e| SerializationError::Decode(e.to_string()))
            }
        }
    }
}

/// Per-context encoder: one match arm per event type, encoding the variant's
/// payload only (the sum-type tag is carried separately as the event name).
pub trait EncodeEvent {
    fn encode_payload(&self, encoding: Encoding) -> Result<Vec<u8>, SerializationError>;
}

/// The serialization boundary used by the event store.
pub trait EventSerializer<E>: Send + Sync {
    fn serialize_domain_event(&self, event: &E) -> Result<Vec<u8>, SerializationError>;

    fn deserialize_domain_event(
        &self,
        event_name: &str,
        bytes: &[u8],
    ) -> Result<E, SerializationError>;

    fn content_type(&self) -> &'static str;

    fn encoding(&self) -> Encoding;
}

/// [`EventSerializer`] backed by an explicit registry and one encoding.
pub struct RegistrySerializer<E> {
    registry: Arc<EventRegistry<E>>,
    encoding: Encoding,
}

impl<E> RegistrySerializer<E> {
    pub fn new(registry: Arc<EventRegistry<E>>, encoding: Encoding) -> Self {
        Self { registry, encoding }
    }

    pub fn json(registry: Arc<EventRegistry<E>>) -> Self {
        Self::new(registry, Encoding::Json)
    }

    pub fn bincode(registry: Arc<EventRegistry<E>>) -> Self {
        Self::new(registry, Encoding::Bincode)
    }

    pub fn registry(&self) -> &Arc<EventRegistry<E>> {
        &self.registry
    }
}

impl<E> Clone for RegistrySerializer<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            encoding: self.encoding,
        }
    }
}

impl<E> core::fmt::Debug for RegistrySerializer<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegistrySerializer")
            .field("encoding", &self.encoding)
            .field("registered", &self.registry.len())
            .finish()
    }
}

impl<E> EventSerializer<E> for RegistrySerializer<E>
where
    E: EncodeEvent + Send + Sync + 'static,
{
    fn serialize_domain_event(&self, event: &E) -> Result<Vec<u8>, SerializationError> {
        event.encode_payload(self.encoding)
    }

    fn deserialize_domain_event(
        &self,
        event_name: &str,
        bytes: &[u8],
    ) -> Result<E, SerializationError> {
        self.registry.decode(event_name, self.encoding, bytes)
    }

    fn content_type(&self) -> &'static str {
        self.encoding.content_type()
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }
}
