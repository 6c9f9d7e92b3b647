//! `keel-core`: event-sourcing foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the event capability set, the aggregate/event-application model and the
//! domain error type.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod id;

pub use aggregate::{AggregateState, AggregateStream, EventSourced};
pub use error::{DomainError, DomainResult};
pub use event::DomainEvent;
pub use id::AggregateId;
