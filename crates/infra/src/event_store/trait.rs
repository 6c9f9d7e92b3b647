use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use keel_events::{StoredStreamEvent, StreamId};

/// Storage-level error.
///
/// These are **infrastructure errors** (concurrency, storage, timeouts) as
/// opposed to domain errors (validation, invariants).
///
/// ## Error Categories
///
/// - **UnexpectedVersion**: optimistic concurrency check failed; the caller
///   should reload the aggregate and retry the command
/// - **InvalidAppend**: the batch itself is malformed (version gap)
/// - **StreamNotFound / CursorNotFound / RecordNotFound**: lookups on
///   identifiers the store does not know
/// - **Timeout / Io**: the backend did not answer in time or failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unexpected version {version} for stream '{stream}'")]
    UnexpectedVersion { stream: String, version: u64 },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("stream '{0}' not found")]
    StreamNotFound(String),

    #[error("cursor {0} not found")]
    CursorNotFound(StreamId),

    #[error("record {0} not found")]
    RecordNotFound(StreamId),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage failure: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether the error is a lost optimistic-concurrency race.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::UnexpectedVersion { .. })
    }
}

/// Append-only record store.
///
/// The store is the **persistence layer** for events. Records are organized
/// into streams (one per aggregate instance) and carry a zero-based
/// `stream_version`.
///
/// ## Append Semantics
///
/// `append()`:
/// - Persists the whole batch atomically (all or nothing)
/// - Rejects a record whose `(stream, version)` already exists with
///   [`StoreError::UnexpectedVersion`]; this is the concurrency check
/// - Requires versions within one stream to be contiguous from the current
///   stream length; a gap is [`StoreError::InvalidAppend`]
/// - Never reorders records across streams
///
/// ## Read Semantics
///
/// - `read_records()` returns one stream in ascending version order; an
///   unknown stream is an empty vector (backends may instead return
///   [`StoreError::StreamNotFound`], which callers treat as empty)
/// - `read_all_records()` returns every record in a stable,
///   implementation-defined order
/// - `read_records_after()` pages through that same order
#[async_trait]
pub trait AppendOnlyStore: Send + Sync {
    async fn append(&self, records: Vec<StoredStreamEvent>) -> Result<(), StoreError>;

    async fn read_records(&self, stream_name: &str) -> Result<Vec<StoredStreamEvent>, StoreError>;

    async fn read_all_records(&self) -> Result<Vec<StoredStreamEvent>, StoreError>;

    /// Records strictly after `cursor` in `read_all_records` order (all of
    /// them when `cursor` is `None`), truncated to `limit`.
    ///
    /// Backends with an index should override this full scan.
    async fn read_records_after(
        &self,
        cursor: Option<&StreamId>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredStreamEvent>, StoreError> {
        let all = self.read_all_records().await?;
        let start = match cursor {
            None => 0,
            Some(cursor) => all
                .iter()
                .position(|r| &r.id == cursor)
                .map(|idx| idx + 1)
                .ok_or_else(|| StoreError::CursorNotFound(cursor.clone()))?,
        };

        let rest = all.into_iter().skip(start);
        Ok(match limit {
            Some(limit) => rest.take(limit).collect(),
            None => rest.collect(),
        })
    }
}

/// Append-only store that also tracks outbox dispatch state.
///
/// `read_undispatched_records()` **claims** what it returns for a lease so
/// that concurrent relays do not publish the same record at the same time.
/// A claim ends when the record is marked dispatched, when it is released,
/// or when the lease expires.
#[async_trait]
pub trait OutboxStore: AppendOnlyStore {
    async fn read_undispatched_records(&self) -> Result<Vec<StoredStreamEvent>, StoreError>;

    /// Set `dispatched = true`. Fails with [`StoreError::RecordNotFound`]
    /// (and changes nothing) if any id is unknown.
    async fn mark_records_as_dispatched(&self, ids: &[StreamId]) -> Result<(), StoreError>;

    /// Drop claims early. Unknown or unclaimed ids are ignored.
    async fn release_records(&self, ids: &[StreamId]) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> AppendOnlyStore for Arc<S>
where
    S: AppendOnlyStore + ?Sized,
{
    async fn append(&self, records: Vec<StoredStreamEvent>) -> Result<(), StoreError> {
        (**self).append(records).await
    }

    async fn read_records(&self, stream_name: &str) -> Result<Vec<StoredStreamEvent>, StoreError> {
        (**self).read_records(stream_name).await
    }

    async fn read_all_records(&self) -> Result<Vec<StoredStreamEvent>, StoreError> {
        (**self).read_all_records().await
    }

    async fn read_records_after(
        &self,
        cursor: Option<&StreamId>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredStreamEvent>, StoreError> {
        (**self).read_records_after(cursor, limit).await
    }
}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn read_undispatched_records(&self) -> Result<Vec<StoredStreamEvent>, StoreError> {
        (**self).read_undispatched_records().await
    }

    async fn mark_records_as_dispatched(&self, ids: &[StreamId]) -> Result<(), StoreError> {
        (**self).mark_records_as_dispatched(ids).await
    }

    async fn release_records(&self, ids: &[StreamId]) -> Result<(), StoreError> {
        (**self).release_records(ids).await
    }
}
