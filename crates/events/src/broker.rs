//! Message broker contract (mechanics only).
//!
//! The broker is the **transport layer** for events after they have been
//! persisted and relayed by the outbox:
//!
//! ```text
//! Aggregate → Event Store (append) → Outbox (relay) → Broker (publish) → Subscribers
//! ```
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a message is redelivered to a subscriber until that
//!   subscriber acknowledges it
//! - **Independent subscribers**: every subscriber has its own queue; one
//!   subscriber's acks never affect another's
//! - **No ordering across redeliveries**: handlers must be idempotent
//!
//! Messages are opaque bytes; the outbox decides their shape.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker is closed")]
    Closed,

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("broker state lock poisoned")]
    Poisoned,
}

/// Identity of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle a subscriber uses to acknowledge one delivery.
///
/// Clones share the same flag. Acknowledging is idempotent and only ever
/// moves a message from pending to acknowledged.
#[derive(Debug, Clone, Default)]
pub struct Acknowledger {
    acked: Arc<AtomicBool>,
}

impl Acknowledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the message acknowledged. Returns `true` only for the call that
    /// performed the transition.
    pub fn ack(&self) -> bool {
        !self.acked.swap(true, Ordering::AcqRel)
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }
}

/// One delivery attempt of a message to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: Uuid,
    pub data: Vec<u8>,
    pub acknowledger: Acknowledger,
}

impl Delivery {
    pub fn ack(&self) -> bool {
        self.acknowledger.ack()
    }
}

/// Subscriber callback. Invoked once per delivery attempt; must not block for
/// long, and must be safe to call again for the same message.
pub type MessageHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Publishing side of a broker.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Hand `data` to every current subscriber.
    async fn publish(&self, data: Vec<u8>) -> Result<(), BrokerError>;
}

#[async_trait]
impl<B> MessageBroker for Arc<B>
where
    B: MessageBroker + ?Sized,
{
    async fn publish(&self, data: Vec<u8>) -> Result<(), BrokerError> {
        (**self).publish(data).await
    }
}

/// Subscribing side of a broker.
pub trait Subscribe: Send + Sync {
    fn subscribe(&self, handler: MessageHandler) -> Result<SubscriberId, BrokerError>;

    /// Drop a subscription and its queue. Returns whether it existed.
    fn unsubscribe(&self, id: SubscriberId) -> Result<bool, BrokerError>;
}
