use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::serializer::{Encoding, SerializationError};

/// A concrete event type that is one variant of the context's sum type `E`.
pub trait EventVariant<E>: Serialize + DeserializeOwned + Into<E> + 'static {
    /// Stable event name, stored alongside every record.
    const NAME: &'static str;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("event name '{0}' is already registered")]
    DuplicateEventName(&'static str),
}

type Decoder<E> = fn(Encoding, &[u8]) -> Result<E, SerializationError>;

fn decode_variant<E, V: EventVariant<E>>(
    encoding: Encoding,
    bytes: &[u8],
) -> Result<E, SerializationError> {
    encoding.decode::<V>(bytes).map(Into::into)
}

/// Explicit name → decoder table for one event sum type.
///
/// Built once at the composition root and shared (behind an `Arc`) by every
/// serializer that needs it. There is no global registry.
pub struct EventRegistry<E> {
    decoders: HashMap<&'static str, Decoder<E>>,
}

impl<E> EventRegistry<E> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register `V` under `V::NAME`. A name may be registered only once.
    pub fn register<V: EventVariant<E>>(&mut self) -> Result<&mut Self, RegistryError> {
        if self.decoders.contains_key(V::NAME) {
            return Err(RegistryError::DuplicateEventName(V::NAME));
        }
        let decoder: Decoder<E> = decode_variant::<E, V>;
        self.decoders.insert(V::NAME, decoder);
        Ok(self)
    }

    pub fn decode(
        &self,
        event_name: &str,
        encoding: Encoding,
        bytes: &[u8],
    ) -> Result<E, SerializationError> {
        let decoder = self
            .decoders
            .get(event_name)
            .ok_or_else(|| SerializationError::UnknownEventName(event_name.to_owned()))?;
        decoder(encoding, bytes)
    }

    pub fn contains(&self, event_name: &str) -> bool {
        self.decoders.contains_key(event_name)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.decoders.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> core::fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Opened {
        id: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Doors {
        Opened(Opened),
    }

    impl From<Opened> for Doors {
        fn from(value: Opened) -> Self {
            Doors::Opened(value)
        }
    }

    impl EventVariant<Doors> for Opened {
        const NAME: &'static str = "Opened";
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = EventRegistry::<Doors>::new();
        registry.register::<Opened>().unwrap();

        let err = registry.register::<Opened>().unwrap_err();
        assert_eq!(err, RegistryError::DuplicateEventName("Opened"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn decodes_registered_variant_into_sum_type() {
        let mut registry = EventRegistry::<Doors>::new();
        registry.register::<Opened>().unwrap();

        let bytes = Encoding::Json.encode(&Opened { id: "d-1".into() }).unwrap();
        let decoded = registry.decode("Opened", Encoding::Json, &bytes).unwrap();
        assert_eq!(decoded, Doors::Opened(Opened { id: "d-1".into() }));
        assert!(registry.contains("Opened"));
        assert_eq!(registry.names(), vec!["Opened"]);
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let registry = EventRegistry::<Doors>::default();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.decode("Opened", Encoding::Json, b"{}"),
            Err(SerializationError::UnknownEventName(_))
        ));
    }
}
