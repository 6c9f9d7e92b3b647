//! Storage-neutral event records, the serialization boundary, the projection
//! contract and the message broker contract.

pub mod broker;
pub mod projection;
pub mod registry;
pub mod serializer;
pub mod stream;

pub use broker::{
    Acknowledger, BrokerError, Delivery, MessageBroker, MessageHandler, Subscribe, SubscriberId,
};
pub use projection::Projection;
pub use registry::{EventRegistry, EventVariant, RegistryError};
pub use serializer::{
    BINCODE_CONTENT_TYPE, EncodeEvent, Encoding, EventSerializer, JSON_CONTENT_TYPE,
    RegistrySerializer, SerializationError,
};
pub use stream::{StoredStreamEvent, StreamId};
