//! Live projections: read models kept up to date by polling the event log.

pub mod account_balances;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use keel_events::{EventSerializer, Projection, StreamId};

use crate::event_store::{AppendOnlyStore, EventStore, EventStoreError};
use crate::workers::{Shutdown, WorkerHandle, spawn_periodic};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to load events for projection: {0}")]
    Load(#[from] EventStoreError),
}

struct Folding<P> {
    projection: P,
    cursor: Option<StreamId>,
}

struct Published<V> {
    view: Arc<V>,
    cursor: Option<StreamId>,
}

/// A [`Projection`] plus its cursor and the last published view.
///
/// - `refresh()` is the single writer: refreshes are serialized by an async
///   mutex and fold new events in log order
/// - `snapshot()` is a pointer copy under a shared lock; readers never wait
///   for a refresh to finish folding
pub struct LiveProjection<P: Projection, S, Z> {
    store: EventStore<S, Z, P::Event>,
    batch_limit: Option<usize>,
    folding: Mutex<Folding<P>>,
    published: RwLock<Published<P::View>>,
    applied: AtomicU64,
}

impl<P, S, Z> LiveProjection<P, S, Z>
where
    P: Projection,
    S: AppendOnlyStore + 'static,
    Z: EventSerializer<P::Event> + 'static,
{
    pub fn new(store: EventStore<S, Z, P::Event>, projection: P) -> Self {
        let view = Arc::new(projection.view());
        Self {
            store,
            batch_limit: None,
            folding: Mutex::new(Folding {
                projection,
                cursor: None,
            }),
            published: RwLock::new(Published { view, cursor: None }),
            applied: AtomicU64::new(0),
        }
    }

    /// Cap the number of events folded per refresh.
    pub fn with_batch_limit(mut self, limit: Option<usize>) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Fold every event after the cursor and publish a new view.
    ///
    /// Returns the number of events applied. On a load failure nothing
    /// changes: the cursor, state and view stay where they were.
    pub async fn refresh(&self) -> Result<usize, ProjectionError> {
        let mut folding = self.folding.lock().await;

        let mut query = self.store.read_only();
        if let Some(cursor) = folding.cursor.clone() {
            query = query.after_event_id(cursor);
        }
        if let Some(limit) = self.batch_limit {
            query = query.limit(limit);
        }

        let events = query.load_all_events().await?;
        let Some(last) = events.last().map(|recorded| recorded.id.clone()) else {
            return Ok(0);
        };

        for recorded in &events {
            folding.projection.handle(&recorded.event);
        }
        folding.cursor = Some(last);

        let view = Arc::new(folding.projection.view());
        {
            let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
            published.view = view;
            published.cursor = folding.cursor.clone();
        }

        let applied = events.len();
        self.applied.fetch_add(applied as u64, Ordering::Relaxed);
        debug!(applied, cursor = ?folding.cursor, "projection refreshed");
        Ok(applied)
    }

    /// The last published view. Never triggers a refresh.
    pub fn snapshot(&self) -> Arc<P::View> {
        let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&published.view)
    }

    /// Id of the last event folded into the published view.
    pub fn cursor(&self) -> Option<StreamId> {
        let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
        published.cursor.clone()
    }

    /// Total events applied since construction.
    pub fn applied_events(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Refresh on a fixed interval until `shutdown` fires. Failed refreshes
    /// are logged and retried on the next tick.
    pub fn spawn_refresh_loop(
        self: Arc<Self>,
        interval: Duration,
        shutdown: Shutdown,
    ) -> WorkerHandle {
        spawn_periodic("projection-refresh", interval, shutdown, move || {
            let projection = Arc::clone(&self);
            async move {
                if let Err(err) = projection.refresh().await {
                    warn!(error = %err, "projection refresh failed");
                }
            }
        })
    }
}
