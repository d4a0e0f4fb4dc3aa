//! Bounded FIFO buffer between the poller and the dispatcher workers,
//! plus the dead-letter sink for items that exhaust their retries.
//!
//! One producer (the poller) feeds the channel; any number of dispatcher
//! workers drain it concurrently. Ordering is FIFO in arrival order.
//! A full channel is the backpressure signal: `try_enqueue` reports
//! `QueueFull`, `enqueue` suspends until capacity frees up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::error::EnqueueError;
use crate::model::AnalysisResult;

/// Create a bounded result queue. `capacity` must be non-zero.
pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    (
        QueueProducer {
            tx,
            depth: depth.clone(),
        },
        QueueConsumer {
            rx: Arc::new(AsyncMutex::new(rx)),
            depth,
        },
    )
}

/// Producer half. Dropping every clone closes the queue; consumers then
/// drain what is left and stop.
#[derive(Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<AnalysisResult>,
    depth: Arc<AtomicUsize>,
}

impl QueueProducer {
    /// Append a result, suspending while the queue is at capacity.
    pub async fn enqueue(&self, result: AnalysisResult) -> Result<(), EnqueueError> {
        match self.tx.send(result).await {
            Ok(()) => {
                let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
                gauge!("queue_depth").set(depth as f64);
                counter!("queue_enqueued_total").increment(1);
                Ok(())
            }
            Err(mpsc::error::SendError(r)) => Err(EnqueueError::Closed(r)),
        }
    }

    /// Append a result without waiting; `QueueFull` once capacity is reached.
    pub fn try_enqueue(&self, result: AnalysisResult) -> Result<(), EnqueueError> {
        match self.tx.try_send(result) {
            Ok(()) => {
                let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
                gauge!("queue_depth").set(depth as f64);
                counter!("queue_enqueued_total").increment(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(r)) => Err(EnqueueError::QueueFull(r)),
            Err(mpsc::error::TrySendError::Closed(r)) => Err(EnqueueError::Closed(r)),
        }
    }
}

/// Consumer half, shared by the dispatcher workers. Cloning shares the
/// same channel; each item is delivered to exactly one worker.
#[derive(Clone)]
pub struct QueueConsumer {
    rx: Arc<AsyncMutex<mpsc::Receiver<AnalysisResult>>>,
    depth: Arc<AtomicUsize>,
}

impl QueueConsumer {
    /// Remove the oldest buffered result. Returns `None` once the queue
    /// is closed and fully drained.
    pub async fn dequeue(&self) -> Option<AnalysisResult> {
        let item = self.rx.lock().await.recv().await;
        if item.is_some() {
            // Saturating: the producer increments after its send lands,
            // so a racing consumer may briefly observe zero.
            let prev = self
                .depth
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
                    Some(d.saturating_sub(1))
                })
                .unwrap_or(0);
            gauge!("queue_depth").set(prev.saturating_sub(1) as f64);
        }
        item
    }

    /// Number of items currently buffered.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// A terminally failed item, kept for operator inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEntry {
    pub symbol: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub attempts: u32,
}

impl DeadLetterEntry {
    pub fn new(result: &AnalysisResult, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            symbol: result.symbol.clone(),
            source: result.source.clone(),
            timestamp: result.timestamp,
            reason: reason.into(),
            attempts,
        }
    }
}

/// Sink for items that exhausted retries or were rejected outright.
/// Nothing reaches this sink silently: implementations must leave an
/// operator-visible trace.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, entry: DeadLetterEntry);
}

/// Default sink: structured error log plus a counter.
pub struct TracingDeadLetter;

#[async_trait]
impl DeadLetterSink for TracingDeadLetter {
    async fn record(&self, entry: DeadLetterEntry) {
        counter!("dead_letter_total").increment(1);
        tracing::error!(
            symbol = %entry.symbol,
            source = %entry.source,
            timestamp = %entry.timestamp,
            attempts = entry.attempts,
            reason = %entry.reason,
            "result dead-lettered"
        );
    }
}

/// In-memory sink, for tests and local inspection.
#[derive(Default)]
pub struct MemoryDeadLetter {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetter {
    async fn record(&self, entry: DeadLetterEntry) {
        counter!("dead_letter_total").increment(1);
        self.entries
            .lock()
            .expect("dead-letter mutex poisoned")
            .push(entry);
    }
}

impl MemoryDeadLetter {
    pub fn snapshot(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .expect("dead-letter mutex poisoned")
            .clone()
    }
}
