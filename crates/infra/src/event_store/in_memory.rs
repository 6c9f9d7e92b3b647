use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use keel_events::{StoredStreamEvent, StreamId};

use super::r#trait::{AppendOnlyStore, OutboxStore, StoreError};

/// Default outbox claim lease.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Log {
    /// Global append order.
    records: Vec<StoredStreamEvent>,
    /// Stream name → positions in `records`, ascending version.
    streams: HashMap<String, Vec<usize>>,
    /// Record id → position in `records`.
    positions: HashMap<StreamId, usize>,
    /// Outbox claims and when they expire.
    claims: HashMap<StreamId, Instant>,
}

impl Log {
    fn stream_len(&self, stream_name: &str) -> u64 {
        self.streams.get(stream_name).map_or(0, |s| s.len() as u64)
    }
}

/// In-memory append-only store with outbox leases.
///
/// Intended for tests/dev. One write critical section per append, so
/// concurrent appends to the same `(stream, version)` resolve to exactly one
/// winner.
#[derive(Debug)]
pub struct InMemoryAppendOnlyStore {
    log: RwLock<Log>,
    lease: Duration,
}

impl Default for InMemoryAppendOnlyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAppendOnlyStore {
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            log: RwLock::new(Log::default()),
            lease,
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Total number of records across all streams.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Number of live outbox claims.
    pub fn claimed(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        Ok(self.read()?.claims.values().filter(|until| **until > now).count())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Log>, StoreError> {
        self.log
            .read()
            .map_err(|_| StoreError::Io("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Log>, StoreError> {
        self.log
            .write()
            .map_err(|_| StoreError::Io("lock poisoned".to_string()))
    }
}

#[async_trait]
impl AppendOnlyStore for InMemoryAppendOnlyStore {
    async fn append(&self, records: Vec<StoredStreamEvent>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut log = self.write()?;

        // Validate the whole batch before touching the log (all or nothing).
        let mut next: HashMap<&str, u64> = HashMap::new();
        for record in &records {
            let stream = record.stream_name();
            let expected = match next.get(stream) {
                Some(v) => *v,
                None => log.stream_len(stream),
            };
            let version = record.stream_version();

            if version < expected {
                return Err(StoreError::UnexpectedVersion {
                    stream: stream.to_string(),
                    version,
                });
            }
            if version > expected {
                return Err(StoreError::InvalidAppend(format!(
                    "stream '{stream}' expects version {expected}, got {version}"
                )));
            }
            next.insert(stream, expected + 1);
        }

        for mut record in records {
            let position = log.records.len();
            record.dispatched = false;
            log.streams
                .entry(record.id.stream_name.clone())
                .or_default()
                .push(position);
            log.positions.insert(record.id.clone(), position);
            log.records.push(record);
        }

        Ok(())
    }

    async fn read_records(&self, stream_name: &str) -> Result<Vec<StoredStreamEvent>, StoreError> {
        let log = self.read()?;
        Ok(log
            .streams
            .get(stream_name)
            .map(|positions| positions.iter().map(|p| log.records[*p].clone()).collect())
            .unwrap_or_default())
    }

    async fn read_all_records(&self) -> Result<Vec<StoredStreamEvent>, StoreError> {
        Ok(self.read()?.records.clone())
    }

    async fn read_records_after(
        &self,
        cursor: Option<&StreamId>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredStreamEvent>, StoreError> {
        let log = self.read()?;
        let start = match cursor {
            None => 0,
            Some(cursor) => log
                .positions
                .get(cursor)
                .map(|p| p + 1)
                .ok_or_else(|| StoreError::CursorNotFound(cursor.clone()))?,
        };
        let end = match limit {
            Some(limit) => start.saturating_add(limit).min(log.records.len()),
            None => log.records.len(),
        };
        Ok(log.records[start..end].to_vec())
    }
}

#[async_trait]
impl OutboxStore for InMemoryAppendOnlyStore {
    async fn read_undispatched_records(&self) -> Result<Vec<StoredStreamEvent>, StoreError> {
        let now = Instant::now();
        let mut guard = self.write()?;
        let Log {
            records, claims, ..
        } = &mut *guard;

        claims.retain(|_, until| *until > now);

        let batch: Vec<StoredStreamEvent> = records
            .iter()
            .filter(|r| !r.dispatched && !claims.contains_key(&r.id))
            .cloned()
            .collect();

        let until = now + self.lease;
        for record in &batch {
            claims.insert(record.id.clone(), until);
        }

        Ok(batch)
    }

    async fn mark_records_as_dispatched(&self, ids: &[StreamId]) -> Result<(), StoreError> {
        let mut log = self.write()?;

        let mut positions = Vec::with_capacity(ids.len());
        for id in ids {
            let position = log
                .positions
                .get(id)
                .copied()
                .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
            positions.push(position);
        }

        for (id, position) in ids.iter().zip(positions) {
            log.records[position].dispatched = true;
            log.claims.remove(id);
        }
        Ok(())
    }

    async fn release_records(&self, ids: &[StreamId]) -> Result<(), StoreError> {
        let mut log = self.write()?;
        for id in ids {
            log.claims.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(stream: &str, version: u64) -> StoredStreamEvent {
        StoredStreamEvent::new(
            StreamId::new(stream, version),
            "Noted",
            format!("{{\"v\":{version}}}").into_bytes(),
            "application/json",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn appends_and_reads_in_version_order() {
        let store = InMemoryAppendOnlyStore::new();
        store
            .append(vec![record("a", 0), record("b", 0), record("a", 1)])
            .await
            .unwrap();

        let a = store.read_records("a").await.unwrap();
        assert_eq!(
            a.iter().map(|r| r.stream_version()).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(store.read_all_records().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_stream_reads_empty() {
        let store = InMemoryAppendOnlyStore::new();
        assert!(store.read_records("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_version_is_a_conflict() {
        let store = InMemoryAppendOnlyStore::new();
        store.append(vec![record("a", 0)]).await.unwrap();

        let err = store.append(vec![record("a", 0)]).await.unwrap_err();
        assert!(err.is_version_conflict());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn version_gap_is_invalid() {
        let store = InMemoryAppendOnlyStore::new();
        let err = store.append(vec![record("a", 1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidAppend(_)));
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_trace() {
        let store = InMemoryAppendOnlyStore::new();
        store.append(vec![record("a", 0)]).await.unwrap();

        let err = store
            .append(vec![record("b", 0), record("a", 0)])
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());
        assert!(store.read_records("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn paging_after_cursor() {
        let store = InMemoryAppendOnlyStore::new();
        store
            .append(vec![record("a", 0), record("a", 1), record("a", 2)])
            .await
            .unwrap();

        let page = store
            .read_records_after(Some(&StreamId::new("a", 0)), Some(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, StreamId::new("a", 1));

        let tail = store
            .read_records_after(Some(&StreamId::new("a", 2)), None)
            .await
            .unwrap();
        assert!(tail.is_empty());

        let err = store
            .read_records_after(Some(&StreamId::new("zzz", 0)), None)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::CursorNotFound(StreamId::new("zzz", 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn claims_hide_records_until_lease_expires() {
        let store = InMemoryAppendOnlyStore::with_lease(Duration::from_secs(30));
        store.append(vec![record("a", 0)]).await.unwrap();

        assert_eq!(store.read_undispatched_records().await.unwrap().len(), 1);
        assert!(store.read_undispatched_records().await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.read_undispatched_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn released_records_are_claimable_again() {
        let store = InMemoryAppendOnlyStore::new();
        store.append(vec![record("a", 0)]).await.unwrap();

        let batch = store.read_undispatched_records().await.unwrap();
        store.release_records(&[batch[0].id.clone()]).await.unwrap();

        assert_eq!(store.read_undispatched_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn marking_is_terminal_and_validates_ids() {
        let store = InMemoryAppendOnlyStore::new();
        store.append(vec![record("a", 0)]).await.unwrap();
        let id = StreamId::new("a", 0);

        let err = store
            .mark_records_as_dispatched(&[id.clone(), StreamId::new("a", 9)])
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::RecordNotFound(StreamId::new("a", 9)));
        assert!(!store.read_records("a").await.unwrap()[0].dispatched);

        store.mark_records_as_dispatched(&[id]).await.unwrap();
        assert!(store.read_records("a").await.unwrap()[0].dispatched);
        assert!(store.read_undispatched_records().await.unwrap().is_empty());
        assert_eq!(store.claimed().unwrap(), 0);
    }
}
