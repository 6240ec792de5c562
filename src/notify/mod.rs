//! Best-effort fan-out of committed transitions to external collaborators.

/// SQLite journal subscriber.
pub mod sqlite;

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{config::SyncConfig, runtime::events::SyncEvent};

/// Delivery attempts per event and subscriber: the first try plus one retry.
pub const DELIVERY_ATTEMPTS: u32 = 2;

/// A subscriber failed to take an event.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Attempt exceeded its time budget.
    #[error("delivery timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// Subscriber-specific failure.
    #[error("subscriber error: {0}")]
    Subscriber(String),
    /// SQLite failure.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// Encoding failure.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// Blocking task panicked or was cancelled.
    #[error("join error: {0}")]
    Join(String),
}

/// Result alias for subscriber calls.
pub type SyncResult<T> = Result<T, SyncError>;

/// Boxed future returned by [`SyncSubscriber::deliver`].
pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>>;

/// Receiver of committed transitions (persistence sync, presentation refresh).
///
/// Treated as untrusted: it may be slow or fail, and the notifier bounds both.
/// Deliveries may repeat after a timeout, so implementations should be
/// idempotent on `(event_id, version)`.
pub trait SyncSubscriber: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Takes one event.
    fn deliver<'a>(&'a self, event: &'a SyncEvent) -> DeliveryFuture<'a>;
}

/// Delivery counters across all subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStats {
    /// Successful deliveries.
    pub delivered: u64,
    /// Second attempts made.
    pub retried: u64,
    /// Events given up on after the retry.
    pub failed: u64,
    /// Events never attempted because the subscriber queue was full or gone.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

enum SyncMsg {
    Deliver(Arc<SyncEvent>),
    Shutdown { resp: oneshot::Sender<()> },
}

struct Worker {
    name: String,
    tx: mpsc::Sender<SyncMsg>,
}

/// Fans [`SyncEvent`]s out to subscribers without ever blocking the caller.
///
/// Each subscriber has its own bounded queue and worker task, so one slow
/// subscriber neither delays the actors nor the other subscribers, and each
/// subscriber sees an event's versions in commit order.
#[derive(Clone)]
pub struct SyncNotifier {
    workers: Arc<[Worker]>,
    counters: Arc<Counters>,
}

impl SyncNotifier {
    /// Spawns one worker per subscriber. Must run inside a tokio runtime.
    pub fn new(subscribers: Vec<Arc<dyn SyncSubscriber>>, config: &SyncConfig) -> Self {
        let counters = Arc::new(Counters::default());
        let workers = subscribers
            .into_iter()
            .map(|sub| {
                let (tx, rx) = mpsc::channel(config.queue_bound.max(1));
                let name = sub.name().to_string();
                spawn_delivery_worker(sub, rx, config.clone(), Arc::clone(&counters));
                Worker { name, tx }
            })
            .collect::<Vec<_>>();

        Self {
            workers: workers.into(),
            counters,
        }
    }

    /// Notifier with no subscribers.
    pub fn disabled() -> Self {
        Self {
            workers: Vec::<Worker>::new().into(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues `event` for every subscriber. Never waits.
    pub fn dispatch(&self, event: SyncEvent) {
        if self.workers.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for worker in self.workers.iter() {
            if let Err(err) = worker.tx.try_send(SyncMsg::Deliver(Arc::clone(&event))) {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "worker stopped",
                };
                tracing::warn!(
                    subscriber = %worker.name,
                    event_id = %event.event_id,
                    version = event.version,
                    reason,
                    "dropping sync event"
                );
            }
        }
    }

    /// Current counters.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Lets every worker finish what is already queued, then stops it.
    pub async fn shutdown(&self) {
        for worker in self.workers.iter() {
            let (tx, rx) = oneshot::channel();
            if worker.tx.send(SyncMsg::Shutdown { resp: tx }).await.is_ok() {
                let _ = rx.await;
            }
        }
    }
}

fn spawn_delivery_worker(
    sub: Arc<dyn SyncSubscriber>,
    mut rx: mpsc::Receiver<SyncMsg>,
    config: SyncConfig,
    counters: Arc<Counters>,
) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                SyncMsg::Deliver(event) => {
                    deliver_with_retry(sub.as_ref(), &event, &config, &counters).await;
                }
                SyncMsg::Shutdown { resp } => {
                    let _ = resp.send(());
                    break;
                }
            }
        }
        tracing::debug!(subscriber = %sub.name(), "sync worker stopped");
    });
}

async fn deliver_with_retry(
    sub: &dyn SyncSubscriber,
    event: &SyncEvent,
    config: &SyncConfig,
    counters: &Counters,
) {
    for attempt in 1..=DELIVERY_ATTEMPTS {
        if attempt > 1 {
            counters.retried.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(config.retry_delay()).await;
        }

        let result = match tokio::time::timeout(config.timeout(), sub.deliver(event)).await {
            Ok(inner) => inner,
            Err(_) => Err(SyncError::Timeout(config.timeout())),
        };

        match result {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    subscriber = %sub.name(),
                    event_id = %event.event_id,
                    version = event.version,
                    attempt,
                    "sync event delivered"
                );
                return;
            }
            Err(err) => {
                tracing::warn!(
                    subscriber = %sub.name(),
                    event_id = %event.event_id,
                    version = event.version,
                    attempt,
                    error = %err,
                    "sync delivery failed"
                );
            }
        }
    }

    counters.failed.fetch_add(1, Ordering::Relaxed);
    tracing::error!(
        subscriber = %sub.name(),
        event_id = %event.event_id,
        version = event.version,
        "giving up on sync event"
    );
}
