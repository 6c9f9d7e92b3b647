//! Infrastructure layer: record storage, typed event store, live projections,
//! outbox relay, reference broker and background workers.

pub mod broker;
pub mod config;
pub mod event_store;
pub mod outbox;
pub mod projections;
pub mod workers;


pub use broker::{BrokerHandle, InMemoryBroker};
pub use config::KernelConfig;
pub use event_store::{
    AppendOnlyStore, EventStore, EventStoreError, InMemoryAppendOnlyStore, OutboxStore,
    ReadOnlyEventStore, RecordedEvent, StoreError,
};
pub use outbox::{Outbox, OutboxError, OutboxMessage};
pub use projections::{LiveProjection, ProjectionError};
pub use workers::{Shutdown, ShutdownTrigger, WorkerHandle};
