use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a record within its stream.
///
/// `(stream_name, stream_version)` is the append-time uniqueness key; versions
/// are zero-based and contiguous per stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub stream_name: String,
    pub stream_version: u64,
}

impl StreamId {
    pub fn new(stream_name: impl Into<String>, stream_version: u64) -> Self {
        Self {
            stream_name: stream_name.into(),
            stream_version,
        }
    }
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.stream_name, self.stream_version)
    }
}

/// The persisted form of one event.
///
/// This is the unit appended to the store and carried through the outbox.
///
/// Notes:
/// - **Append-only**: every field is fixed once appended, except `dispatched`.
/// - `dispatched` moves from `false` to `true` exactly once, when the outbox
///   has handed the record to the broker.
/// - `event_data` is opaque; `content_type` names the encoding that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStreamEvent {
    pub id: StreamId,
    pub event_name: String,
    pub event_data: Vec<u8>,
    pub content_type: String,
    pub happened_on: DateTime<Utc>,
    pub dispatched: bool,
}

impl StoredStreamEvent {
    pub fn new(
        id: StreamId,
        event_name: impl Into<String>,
        event_data: Vec<u8>,
        content_type: impl Into<String>,
        happened_on: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_name: event_name.into(),
            event_data,
            content_type: content_type.into(),
            happened_on,
            dispatched: false,
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.id.stream_name
    }

    pub fn stream_version(&self) -> u64 {
        self.id.stream_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_order_by_name_then_version() {
        let a0 = StreamId::new("a", 0);
        let a1 = StreamId::new("a", 1);
        let b0 = StreamId::new("b", 0);
        assert!(a0 < a1);
        assert!(a1 < b0);
        assert_eq!(a1.to_string(), "a@1");
    }

    #[test]
    fn new_records_start_undispatched() {
        let record = StoredStreamEvent::new(
            StreamId::new("acct-1", 0),
            "AccountOpened",
            b"{}".to_vec(),
            "application/json",
            Utc::now(),
        );
        assert!(!record.dispatched);
        assert_eq!(record.stream_name(), "acct-1");
        assert_eq!(record.stream_version(), 0);
    }
}
