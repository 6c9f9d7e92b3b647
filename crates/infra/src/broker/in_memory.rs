use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use keel_events::{
    Acknowledger, BrokerError, Delivery, MessageBroker, MessageHandler, Subscribe, SubscriberId,
};

use crate::workers::{Shutdown, WorkerHandle, spawn_periodic};

pub const DEFAULT_SERVE_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Queued {
    message_id: Uuid,
    data: Vec<u8>,
    acknowledger: Acknowledger,
}

struct Subscriber {
    handler: MessageHandler,
    queue: Mutex<Vec<Queued>>,
    serving: AtomicBool,
}

impl Subscriber {
    /// Deliver every queued message that is not acknowledged yet, once each.
    ///
    /// Runs on the blocking pool. The queue lock is released before any
    /// handler is called.
    fn serve(&self, id: SubscriberId) -> usize {
        let deliveries: Vec<Delivery> = match self.queue.lock() {
            Ok(queue) => queue
                .iter()
                .filter(|m| !m.acknowledger.is_acked())
                .map(|m| Delivery {
                    message_id: m.message_id,
                    data: m.data.clone(),
                    acknowledger: m.acknowledger.clone(),
                })
                .collect(),
            Err(_) => {
                warn!(subscriber = %id, "subscriber queue lock poisoned");
                return 0;
            }
        };

        let delivered = deliveries.len();
        for delivery in deliveries {
            (self.handler)(delivery);
        }
        delivered
    }

    fn drop_acknowledged(&self) -> usize {
        match self.queue.lock() {
            Ok(mut queue) => {
                let before = queue.len();
                queue.retain(|m| !m.acknowledger.is_acked());
                before - queue.len()
            }
            Err(_) => 0,
        }
    }
}

/// In-memory, at-least-once reference broker.
///
/// - Every subscriber owns an independent queue; `publish` fans out to all
///   subscribers present at that moment
/// - A serve tick hands each subscriber its unacknowledged messages on the
///   blocking pool; a subscriber still busy with the previous tick is
///   skipped, so a slow or hung handler only delays itself
/// - A handler that panics ends that serve early; the subscriber is served
///   again on the next tick
/// - A cleanup tick drops acknowledged messages
///
/// Unacknowledged messages are redelivered on every serve tick, without a
/// redelivery cap.
pub struct InMemoryBroker {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
    serve_interval: Duration,
    cleanup_interval: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("serve_interval", &self.serve_interval)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish_non_exhaustive()
    }
}

/// Handles to the broker's two background loops.
#[derive(Debug)]
pub struct BrokerHandle {
    pub serve: WorkerHandle,
    pub cleanup: WorkerHandle,
}

impl BrokerHandle {
    /// Wait for both loops to exit (trigger shutdown first).
    pub async fn join(self) {
        for worker in [self.serve, self.cleanup] {
            let name = worker.name();
            if let Err(err) = worker.join().await {
                warn!(worker = name, error = %err, "broker worker ended abnormally");
            }
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_intervals(DEFAULT_SERVE_INTERVAL, DEFAULT_CLEANUP_INTERVAL)
    }

    pub fn with_intervals(serve_interval: Duration, cleanup_interval: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            serve_interval,
            cleanup_interval,
        }
    }

    /// Spawn the serve and cleanup loops.
    pub fn start(self: &Arc<Self>, shutdown: Shutdown) -> BrokerHandle {
        let broker = Arc::clone(self);
        let serve = spawn_periodic("broker-serve", self.serve_interval, shutdown.clone(), move || {
            broker.serve_tick();
            std::future::ready(())
        });

        let broker = Arc::clone(self);
        let cleanup = spawn_periodic("broker-cleanup", self.cleanup_interval, shutdown, move || {
            broker.cleanup_tick();
            std::future::ready(())
        });

        BrokerHandle { serve, cleanup }
    }

    /// Schedule one serving task per idle subscriber. Returns how many were
    /// scheduled.
    pub fn serve_tick(&self) -> usize {
        let subscribers = match self.snapshot() {
            Ok(subscribers) => subscribers,
            Err(err) => {
                warn!(error = %err, "broker serve tick skipped");
                return 0;
            }
        };

        let mut scheduled = 0;
        for (id, subscriber) in subscribers {
            if subscriber.serving.swap(true, Ordering::AcqRel) {
                continue;
            }
            scheduled += 1;
            tokio::spawn(async move {
                let worker = Arc::clone(&subscriber);
                match tokio::task::spawn_blocking(move || worker.serve(id)).await {
                    Ok(0) => {}
                    Ok(delivered) => debug!(subscriber = %id, delivered, "served subscriber"),
                    Err(err) => warn!(subscriber = %id, error = %err, "subscriber handler failed"),
                }
                subscriber.serving.store(false, Ordering::Release);
            });
        }
        scheduled
    }

    /// Subscribers whose previous serve has not finished yet.
    pub fn serving(&self) -> usize {
        match self.snapshot() {
            Ok(subscribers) => subscribers
                .iter()
                .filter(|(_, subscriber)| subscriber.serving.load(Ordering::Acquire))
                .count(),
            Err(_) => 0,
        }
    }

    /// Drop acknowledged messages from every queue. Returns how many were
    /// dropped.
    pub fn cleanup_tick(&self) -> usize {
        match self.snapshot() {
            Ok(subscribers) => subscribers
                .iter()
                .map(|(_, subscriber)| subscriber.drop_acknowledged())
                .sum(),
            Err(err) => {
                warn!(error = %err, "broker cleanup tick skipped");
                0
            }
        }
    }

    /// Messages queued for `id` that have not been acknowledged yet.
    pub fn pending(&self, id: SubscriberId) -> Result<usize, BrokerError> {
        let subscribers = self.subscribers.read().map_err(|_| BrokerError::Poisoned)?;
        let Some(subscriber) = subscribers.get(&id) else {
            return Ok(0);
        };
        let queue = subscriber.queue.lock().map_err(|_| BrokerError::Poisoned)?;
        Ok(queue.iter().filter(|m| !m.acknowledger.is_acked()).count())
    }

    /// Messages still held for `id`, acknowledged or not.
    pub fn queued(&self, id: SubscriberId) -> Result<usize, BrokerError> {
        let subscribers = self.subscribers.read().map_err(|_| BrokerError::Poisoned)?;
        let Some(subscriber) = subscribers.get(&id) else {
            return Ok(0);
        };
        let queue = subscriber.queue.lock().map_err(|_| BrokerError::Poisoned)?;
        Ok(queue.len())
    }

    fn snapshot(&self) -> Result<Vec<(SubscriberId, Arc<Subscriber>)>, BrokerError> {
        let subscribers = self.subscribers.read().map_err(|_| BrokerError::Poisoned)?;
        Ok(subscribers
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
            .collect())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, data: Vec<u8>) -> Result<(), BrokerError> {
        let message_id = Uuid::now_v7();
        let subscribers = self.subscribers.read().map_err(|_| BrokerError::Poisoned)?;
        for subscriber in subscribers.values() {
            let mut queue = subscriber.queue.lock().map_err(|_| BrokerError::Poisoned)?;
            queue.push(Queued {
                message_id,
                data: data.clone(),
                acknowledger: Acknowledger::new(),
            });
        }
        Ok(())
    }
}

impl Subscribe for InMemoryBroker {
    fn subscribe(&self, handler: MessageHandler) -> Result<SubscriberId, BrokerError> {
        let id = SubscriberId::new();
        let subscriber = Arc::new(Subscriber {
            handler,
            queue: Mutex::new(Vec::new()),
            serving: AtomicBool::new(false),
        });
        self.subscribers
            .write()
            .map_err(|_| BrokerError::Poisoned)?
            .insert(id, subscriber);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriberId) -> Result<bool, BrokerError> {
        Ok(self
            .subscribers
            .write()
            .map_err(|_| BrokerError::Poisoned)?
            .remove(&id)
            .is_some())
    }
}
