//! Background worker plumbing: shutdown signalling and task handles.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Receiving side of the shutdown signal. Cheap to clone; one per loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered (or the trigger is dropped).
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sending side of the shutdown signal.
///
/// Dropping the trigger also stops every loop holding a [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn pair() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Handle to a spawned background loop.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit (trigger shutdown first).
    pub async fn join(self) -> Result<(), JoinError> {
        self.join.await
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Shortest period a periodic worker runs at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Spawn `tick` on a fixed interval until `shutdown` fires.
///
/// Missed ticks are skipped and intervals below [`MIN_PERIOD`] are raised to
/// it. A tick's work always runs to completion before the shutdown signal is
/// looked at again.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: Shutdown,
    mut tick: F,
) -> WorkerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = interval.max(MIN_PERIOD);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(worker = name, interval_ms = interval.as_millis() as u64, "worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => tick().await,
            }
        }

        info!(worker = name, "worker stopped");
    });

    WorkerHandle { name, join }
}
