//! Message broker adapters.

pub mod in_memory;

pub use in_memory::{BrokerHandle, InMemoryBroker};
