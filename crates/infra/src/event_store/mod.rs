//! Append-only event store boundary.
//!
//! Two layers:
//! - [`AppendOnlyStore`] / [`OutboxStore`]: byte-level record storage with
//!   the optimistic-concurrency contract, plus an in-memory backend
//! - [`EventStore`]: typed façade that serializes aggregates' uncommitted
//!   events into records and decodes records back into events

pub mod in_memory;
pub mod r#trait;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument};

use keel_core::{
    AggregateId, AggregateState, AggregateStream, DomainError, DomainEvent, EventSourced,
};
use keel_events::{EventSerializer, SerializationError, StoredStreamEvent, StreamId};

pub use in_memory::InMemoryAppendOnlyStore;
pub use r#trait::{AppendOnlyStore, OutboxStore, StoreError};

/// Default upper bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a store call with a deadline.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("failed to serialize event '{event_name}': {source}")]
    Serialize {
        event_name: &'static str,
        source: SerializationError,
    },

    #[error("failed to deserialize '{event_name}' at {stream}@{version}: {source}")]
    Deserialize {
        stream: String,
        version: u64,
        event_name: String,
        source: SerializationError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl EventStoreError {
    /// Whether the caller lost an optimistic-concurrency race and should
    /// reload and retry.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, EventStoreError::Store(err) if err.is_version_conflict())
    }
}

/// A decoded event together with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent<E> {
    pub id: StreamId,
    pub event: E,
}

/// Typed event store over an [`AppendOnlyStore`] and an [`EventSerializer`].
///
/// Stateless apart from its shared handles; cheap to clone.
pub struct EventStore<S, Z, E> {
    store: Arc<S>,
    serializer: Arc<Z>,
    timeout: Duration,
    _event: PhantomData<fn() -> E>,
}

impl<S, Z, E> Clone for EventStore<S, Z, E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            serializer: Arc::clone(&self.serializer),
            timeout: self.timeout,
            _event: PhantomData,
        }
    }
}

impl<S, Z, E> core::fmt::Debug for EventStore<S, Z, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<S, Z, E> EventStore<S, Z, E>
where
    S: AppendOnlyStore,
    Z: EventSerializer<E>,
    E: DomainEvent,
{
    pub fn new(store: Arc<S>, serializer: Arc<Z>) -> Self {
        Self {
            store,
            serializer,
            timeout: DEFAULT_STORE_TIMEOUT,
            _event: PhantomData,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn serializer(&self) -> &Arc<Z> {
        &self.serializer
    }

    /// Persist the uncommitted events of every aggregate in one atomic append.
    ///
    /// Every event is serialized before any IO; a serialization failure
    /// appends nothing. The aggregates are not modified: call
    /// `mark_committed` on them after this succeeds.
    #[instrument(skip_all, fields(aggregates = aggregates.len()))]
    pub async fn append_to_stream(
        &self,
        aggregates: &[&dyn AggregateStream<E>],
    ) -> Result<(), EventStoreError> {
        let mut records = Vec::new();
        for aggregate in aggregates {
            let events = aggregate.uncommitted_events();
            let base = aggregate
                .version()
                .checked_sub(events.len() as u64)
                .ok_or_else(|| {
                    StoreError::InvalidAppend(format!(
                        "stream '{}' reports fewer versions than uncommitted events",
                        aggregate.stream_name()
                    ))
                })?;

            for (offset, event) in events.iter().enumerate() {
                let event_data = self.serializer.serialize_domain_event(event).map_err(|source| {
                    EventStoreError::Serialize {
                        event_name: event.event_name(),
                        source,
                    }
                })?;
                records.push(StoredStreamEvent::new(
                    StreamId::new(aggregate.stream_name(), base + offset as u64),
                    event.event_name(),
                    event_data,
                    self.serializer.content_type(),
                    event.happened_on(),
                ));
            }
        }

        if records.is_empty() {
            return Ok(());
        }

        let count = records.len();
        bounded(self.timeout, self.store.append(records)).await?;
        debug!(records = count, "appended events");
        Ok(())
    }

    /// Decode one stream. An unknown stream is empty history.
    pub async fn load_event_stream(&self, stream_name: &str) -> Result<Vec<E>, EventStoreError> {
        let records = match bounded(self.timeout, self.store.read_records(stream_name)).await {
            Ok(records) => records,
            Err(StoreError::StreamNotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        records.iter().map(|r| self.decode(r)).collect()
    }

    /// Rehydrate an aggregate from its full stream.
    pub async fn load_aggregate<A>(
        &self,
        id: impl Into<AggregateId>,
    ) -> Result<EventSourced<A>, EventStoreError>
    where
        A: AggregateState<Event = E>,
    {
        let id = id.into();
        let history = self.load_event_stream(id.as_str()).await?;
        Ok(EventSourced::rehydrate(id, history)?)
    }

    /// Read-only view over the whole log.
    pub fn read_only(&self) -> ReadOnlyEventStore<S, Z, E> {
        ReadOnlyEventStore {
            inner: self.clone(),
            after: None,
            limit: None,
        }
    }

    /// Read-only view positioned strictly after `cursor`.
    pub fn after_event_id(&self, cursor: StreamId) -> ReadOnlyEventStore<S, Z, E> {
        self.read_only().after_event_id(cursor)
    }

    /// Read-only view returning at most `limit` events.
    pub fn limit(&self, limit: usize) -> ReadOnlyEventStore<S, Z, E> {
        self.read_only().limit(limit)
    }

    fn decode(&self, record: &StoredStreamEvent) -> Result<E, EventStoreError> {
        let failed = |source| EventStoreError::Deserialize {
            stream: record.id.stream_name.clone(),
            version: record.id.stream_version,
            event_name: record.event_name.clone(),
            source,
        };

        if record.content_type != self.serializer.content_type() {
            return Err(failed(SerializationError::Decode(format!(
                "content type '{}' does not match serializer '{}'",
                record.content_type,
                self.serializer.content_type()
            ))));
        }

        self.serializer
            .deserialize_domain_event(&record.event_name, &record.event_data)
            .map_err(failed)
    }
}

/// Read-only refinement of an [`EventStore`].
///
/// Each refinement returns a new value; the original is unchanged.
pub struct ReadOnlyEventStore<S, Z, E> {
    inner: EventStore<S, Z, E>,
    after: Option<StreamId>,
    limit: Option<usize>,
}

impl<S, Z, E> Clone for ReadOnlyEventStore<S, Z, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            after: self.after.clone(),
            limit: self.limit,
        }
    }
}

impl<S, Z, E> core::fmt::Debug for ReadOnlyEventStore<S, Z, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadOnlyEventStore")
            .field("after", &self.after)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl<S, Z, E> ReadOnlyEventStore<S, Z, E>
where
    S: AppendOnlyStore,
    Z: EventSerializer<E>,
    E: DomainEvent,
{
    pub fn after_event_id(&self, cursor: StreamId) -> Self {
        Self {
            after: Some(cursor),
            ..self.clone()
        }
    }

    pub fn limit(&self, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..self.clone()
        }
    }

    pub fn cursor(&self) -> Option<&StreamId> {
        self.after.as_ref()
    }

    /// Decode every selected record, in log order.
    pub async fn load_all_events(&self) -> Result<Vec<RecordedEvent<E>>, EventStoreError> {
        let records = bounded(
            self.inner.timeout,
            self.inner
                .store
                .read_records_after(self.after.as_ref(), self.limit),
        )
        .await?;

        records
            .iter()
            .map(|record| {
                self.inner.decode(record).map(|event| RecordedEvent {
                    id: record.id.clone(),
                    event,
                })
            })
            .collect()
    }

    pub async fn load_event_stream(&self, stream_name: &str) -> Result<Vec<E>, EventStoreError> {
        self.inner.load_event_stream(stream_name).await
    }
}
