use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use keel_events::{Encoding, SerializationError, StoredStreamEvent};

pub const STREAM_ID: &str = "stream_id";
pub const STREAM_VERSION: &str = "stream_version";
pub const EVENT_NAME: &str = "event_name";
pub const EVENT_DATA: &str = "event_data";
pub const HAPPENED_ON: &str = "happened_on";

/// Flat string map handed to the broker for each relayed record.
///
/// `event_data` carries the record's payload as standard base64;
/// `happened_on` is RFC3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxMessage(BTreeMap<String, String>);

impl OutboxMessage {
    pub fn from_record(record: &StoredStreamEvent) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(STREAM_ID.to_string(), record.id.stream_name.clone());
        fields.insert(STREAM_VERSION.to_string(), record.id.stream_version.to_string());
        fields.insert(EVENT_NAME.to_string(), record.event_name.clone());
        fields.insert(EVENT_DATA.to_string(), STANDARD.encode(&record.event_data));
        fields.insert(
            HAPPENED_ON.to_string(),
            record.happened_on.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
        Self(fields)
    }

    pub fn to_bytes(&self, encoding: Encoding) -> Result<Vec<u8>, SerializationError> {
        encoding.encode(self)
    }

    pub fn from_bytes(encoding: Encoding, bytes: &[u8]) -> Result<Self, SerializationError> {
        encoding.decode(bytes)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.get(STREAM_ID)
    }

    pub fn stream_version(&self) -> Option<u64> {
        self.get(STREAM_VERSION)?.parse().ok()
    }

    pub fn event_name(&self) -> Option<&str> {
        self.get(EVENT_NAME)
    }

    /// Decoded payload bytes.
    pub fn event_data(&self) -> Result<Vec<u8>, SerializationError> {
        let raw = self
            .get(EVENT_DATA)
            .ok_or_else(|| SerializationError::Decode(format!("missing '{EVENT_DATA}'")))?;
        STANDARD
            .decode(raw)
            .map_err(|e| SerializationError::Decode(e.to_string()))
    }

    pub fn happened_on(&self) -> Option<DateTime<Utc>> {
        let raw = self.get(HAPPENED_ON)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use keel_events::StreamId;

    use super::*;

    fn record() -> StoredStreamEvent {
        StoredStreamEvent::new(
            StreamId::new("acct-1", 2),
            "AmountWithdrawn",
            br#"{"amount":30}"#.to_vec(),
            "application/json",
            DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn carries_the_five_documented_keys() {
        let message = OutboxMessage::from_record(&record());

        assert_eq!(
            message.fields().keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["event_data", "event_name", "happened_on", "stream_id", "stream_version"]
        );
        assert_eq!(message.stream_id(), Some("acct-1"));
        assert_eq!(message.stream_version(), Some(2));
        assert_eq!(message.event_name(), Some("AmountWithdrawn"));
        assert_eq!(message.get(EVENT_DATA), Some("eyJhbW91bnQiOjMwfQ=="));
        assert_eq!(message.get(HAPPENED_ON), Some("2024-05-01T12:30:00Z"));
        assert_eq!(message.event_data().unwrap(), br#"{"amount":30}"#.to_vec());
        assert_eq!(message.happened_on(), Some(record().happened_on));
    }

    #[test]
    fn json_wire_form_is_a_flat_object() {
        let bytes = OutboxMessage::from_record(&record())
            .to_bytes(Encoding::Json)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["stream_id"], "acct-1");
        assert_eq!(value["stream_version"], "2");
    }

    #[test]
    fn decodes_from_either_encoding() {
        let message = OutboxMessage::from_record(&record());
        for encoding in [Encoding::Json, Encoding::Bincode] {
            let bytes = message.to_bytes(encoding).unwrap();
            assert_eq!(OutboxMessage::from_bytes(encoding, &bytes).unwrap(), message);
        }
    }
}
