//! Transactional outbox relay.
//!
//! Records are the outbox: every appended record starts undispatched, and
//! the relay moves it to the broker with **at-least-once** semantics.
//!
//! ```text
//! read_undispatched (claim) → encode → publish → mark dispatched
//! ```
//!
//! A record is marked only after its publish succeeded. If marking then
//! fails the record stays undispatched and is published again on a later
//! cycle, so subscribers must tolerate duplicates.

pub mod message;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use keel_events::{
    BrokerError, Encoding, MessageBroker, SerializationError, StoredStreamEvent, StreamId,
};

use crate::event_store::{DEFAULT_STORE_TIMEOUT, OutboxStore, StoreError, bounded};
use crate::workers::{Shutdown, WorkerHandle, spawn_periodic};

pub use message::OutboxMessage;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox store failure: {0}")]
    Store(#[source] StoreError),

    #[error("failed to encode outbox message for {id}: {source}")]
    Encode {
        id: StreamId,
        source: SerializationError,
    },

    #[error("failed to publish {id}: {source}")]
    Publish { id: StreamId, source: BrokerError },

    #[error("published {id} but could not mark it dispatched: {source}")]
    MarkDispatched { id: StreamId, source: StoreError },
}

/// Relays undispatched records from an [`OutboxStore`] to a [`MessageBroker`].
pub struct Outbox<S, B> {
    store: Arc<S>,
    broker: Arc<B>,
    encoding: Encoding,
    timeout: Duration,
}

impl<S, B> core::fmt::Debug for Outbox<S, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Outbox")
            .field("encoding", &self.encoding)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<S, B> Outbox<S, B>
where
    S: OutboxStore + 'static,
    B: MessageBroker + 'static,
{
    pub fn new(store: Arc<S>, broker: Arc<B>) -> Self {
        Self {
            store,
            broker,
            encoding: Encoding::Json,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Wire encoding of the published [`OutboxMessage`]s.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One relay cycle. Returns the number of records dispatched.
    ///
    /// On the first failure the claims on every record not yet dispatched
    /// (the failing one included) are released and the error is returned.
    #[instrument(skip(self))]
    pub async fn dispatch_undispatched_events(&self) -> Result<usize, OutboxError> {
        let records = bounded(self.timeout, self.store.read_undispatched_records())
            .await
            .map_err(OutboxError::Store)?;

        for (idx, record) in records.iter().enumerate() {
            if let Err(err) = self.dispatch_one(record).await {
                self.release(&records[idx..]).await;
                return Err(err);
            }
        }

        if !records.is_empty() {
            debug!(dispatched = records.len(), "outbox cycle complete");
        }
        Ok(records.len())
    }

    async fn dispatch_one(&self, record: &StoredStreamEvent) -> Result<(), OutboxError> {
        let bytes = OutboxMessage::from_record(record)
            .to_bytes(self.encoding)
            .map_err(|source| OutboxError::Encode {
                id: record.id.clone(),
                source,
            })?;

        self.broker
            .publish(bytes)
            .await
            .map_err(|source| OutboxError::Publish {
                id: record.id.clone(),
                source,
            })?;

        let ids = std::slice::from_ref(&record.id);
        bounded(self.timeout, self.store.mark_records_as_dispatched(ids))
            .await
            .map_err(|source| {
                error!(
                    record = %record.id,
                    error = %source,
                    "published record could not be marked dispatched"
                );
                OutboxError::MarkDispatched {
                    id: record.id.clone(),
                    source,
                }
            })
    }

    async fn release(&self, records: &[StoredStreamEvent]) {
        let ids: Vec<StreamId> = records.iter().map(|r| r.id.clone()).collect();
        if let Err(err) = bounded(self.timeout, self.store.release_records(&ids)).await {
            warn!(records = ids.len(), error = %err, "failed to release outbox claims");
        }
    }

    /// Run a relay cycle on a fixed interval until `shutdown` fires.
    pub fn spawn_relay(self: Arc<Self>, interval: Duration, shutdown: Shutdown) -> WorkerHandle {
        spawn_periodic("outbox-relay", interval, shutdown, move || {
            let outbox = Arc::clone(&self);
            async move {
                if let Err(err) = outbox.dispatch_undispatched_events().await {
                    warn!(error = %err, "outbox relay cycle failed");
                }
            }
        })
    }
}
