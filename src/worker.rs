//! # Embedding worker
//!
//! A bounded FIFO of `(entry_id, text)` items drained by exactly one
//! background task. Entry writes hand their canonical text to
//! [`EmbeddingWorker::enqueue`], which never blocks and never fails: when the
//! queue is full the item is dropped, logged and counted, and the
//! reconciliation sweep picks the entry up later.
//!
//! ## Lifecycle
//! `Uninitialized -> Running`. [`EmbeddingWorker::ensure_started`] spawns the
//! consumer on first call and is a no-op afterwards, however many callers race
//! on it.
//!
//! ## Delivery
//! At most once. A failed embed or save is logged and skipped; nothing is
//! retried. After every item the consumer sleeps for the configured pacing
//! delay so bursts do not hammer the provider.
//!
//! Two queued edits of the same entry are processed in order, but nothing
//! stops the sweep from embedding an older text for that entry concurrently,
//! so the last write is not guaranteed to be the freshest text. The next edit
//! or sweep converges it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::embedding_store::EmbeddingService;

/// One unit of embedding work. Immutable once queued.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub entry_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue full (or consumer gone); the item was discarded.
    Dropped,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    accepted: AtomicU64,
    settled: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn is_idle(&self) -> bool {
        self.accepted.load(Ordering::SeqCst) == self.settled.load(Ordering::SeqCst)
    }
}

pub struct EmbeddingWorker {
    sender: Sender<WorkItem>,
    receiver: Mutex<Option<Receiver<WorkItem>>>,
    started: OnceCell<()>,
    service: Arc<EmbeddingService>,
    stats: Arc<WorkerStats>,
    pacing: Duration,
}

impl EmbeddingWorker {
    /// Create a stopped worker with room for `capacity` items.
    pub fn new(service: Arc<EmbeddingService>, capacity: usize, pacing: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            started: OnceCell::new(),
            service,
            stats: Arc::new(WorkerStats::default()),
            pacing,
        }
    }

    /// Offer an item without waiting.
    pub fn enqueue(&self, entry_id: i64, text: impl Into<String>) -> EnqueueOutcome {
        let item = WorkItem {
            entry_id,
            text: text.into(),
        };
        match self.sender.try_send(item) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::SeqCst);
                debug!("Queued embedding for entry {}", entry_id);
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(item)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Embedding queue full; dropped entry {} (the sweep will catch it up)",
                    item.entry_id
                );
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(item)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Embedding worker stopped; dropped entry {}", item.entry_id);
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Spawn the consumer task if it is not running yet. Must be called from
    /// inside a Tokio runtime.
    pub fn ensure_started(&self) {
        self.started.get_or_init(|| {
            let receiver = match self.receiver.lock() {
                Ok(mut slot) => slot.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            match receiver {
                Some(receiver) => {
                    info!("Starting embedding worker");
                    tokio::spawn(run(
                        receiver,
                        Arc::clone(&self.service),
                        Arc::clone(&self.stats),
                        self.pacing,
                    ));
                }
                None => error!("Embedding worker receiver already taken"),
            }
        });
    }

    pub fn is_started(&self) -> bool {
        self.started.get().is_some()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// True when every accepted item has been processed, failed or dropped.
    pub fn is_idle(&self) -> bool {
        self.stats.is_idle()
    }

    /// Poll until the worker is idle or `timeout` passes. Returns whether it
    /// went idle.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_idle() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

async fn run(
    mut receiver: Receiver<WorkItem>,
    service: Arc<EmbeddingService>,
    stats: Arc<WorkerStats>,
    pacing: Duration,
) {
    while let Some(item) = receiver.recv().await {
        process(&item, &service, &stats).await;
        stats.settled.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(pacing).await;
    }
    info!("Embedding worker queue closed; exiting");
}

async fn process(item: &WorkItem, service: &EmbeddingService, stats: &WorkerStats) {
    if !service.is_configured() {
        debug!(
            "No embedding provider; dropping queued entry {}",
            item.entry_id
        );
        stats.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let vector = match service.create_embedding(&item.text).await {
        Ok(vector) => vector,
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to embed entry {}: {}", item.entry_id, e);
            return;
        }
    };

    match service.save_embedding(item.entry_id, &vector).await {
        Ok(()) => {
            stats.processed.fetch_add(1, Ordering::Relaxed);
            debug!("Embedded entry {}", item.entry_id);
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to save embedding for entry {}: {}", item.entry_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::entries::{EntryStore, NewEntry};
    use crate::testing::{FailingProvider, KeywordProvider, service_with, setup};
    use std::time::Instant;

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_enqueue_never_blocks_when_full() {
        setup();
        let db = Database::in_memory().unwrap();
        let worker = EmbeddingWorker::new(
            service_with(&db, Arc::new(KeywordProvider::new())),
            2,
            Duration::ZERO,
        );

        assert_eq!(worker.enqueue(1, "a"), EnqueueOutcome::Queued);
        assert_eq!(worker.enqueue(2, "b"), EnqueueOutcome::Queued);

        let started = Instant::now();
        assert_eq!(worker.enqueue(3, "c"), EnqueueOutcome::Dropped);
        assert!(started.elapsed() < Duration::from_millis(100));

        assert_eq!(worker.stats().dropped, 1);
        assert_eq!(worker.pending(), 2);
        assert!(!worker.is_started());
        assert!(!worker.wait_for_idle(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_processes_queue_and_survives_failures() {
        setup();
        let db = Database::in_memory().unwrap();
        let entries = EntryStore::new(db.clone());
        let aria = entries.create_entry(&NewEntry::new("Aria", "Character", "mage")).unwrap();
        let vel = entries.create_entry(&NewEntry::new("Vel", "Place", "city")).unwrap();
        let service = service_with(&db, Arc::new(KeywordProvider::new()));
        let worker = EmbeddingWorker::new(Arc::clone(&service), 10, Duration::from_millis(1));

        worker.ensure_started();
        worker.ensure_started();
        assert!(worker.is_started());

        worker.enqueue(aria.id, "Aria Character mage");
        // Empty text fails, unknown entry fails on save; neither stops the loop.
        worker.enqueue(vel.id, "   ");
        worker.enqueue(4242, "dragon");
        worker.enqueue(vel.id, "Vel Place city");

        assert!(wait_for(|| worker.stats().processed + worker.stats().failed == 4).await);
        let stats = worker.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 2);
        assert!(worker.wait_for_idle(Duration::from_secs(1)).await);
        assert!(service.get_embedding(aria.id).await.is_ok());
        assert!(service.get_embedding(vel.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_retried() {
        setup();
        let db = Database::in_memory().unwrap();
        let worker = EmbeddingWorker::new(
            service_with(&db, Arc::new(FailingProvider)),
            4,
            Duration::ZERO,
        );
        worker.ensure_started();
        worker.enqueue(1, "Aria");

        assert!(wait_for(|| worker.stats().failed == 1).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(worker.stats().failed, 1);
        assert_eq!(worker.stats().processed, 0);
    }

    #[tokio::test]
    async fn test_unconfigured_service_drops_items() {
        let db = Database::in_memory().unwrap();
        let service = Arc::new(EmbeddingService::new(db, None, Duration::from_secs(1)));
        let worker = EmbeddingWorker::new(service, 4, Duration::ZERO);
        worker.ensure_started();
        worker.enqueue(1, "Aria");

        assert!(wait_for(|| worker.stats().dropped == 1).await);
        assert_eq!(worker.stats().failed, 0);
    }
}
