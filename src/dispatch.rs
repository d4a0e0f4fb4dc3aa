//! Output dispatcher: drives each queued result through the store with
//! exponential backoff on transient failures.
//!
//! Each in-flight item moves through an explicit state machine
//! (attempt, back off, re-attempt) until it is persisted, rejected as
//! permanently invalid, or out of retries. The store tolerates duplicate
//! rows, so re-attempting a write that may already have landed only ever
//! duplicates data, never corrupts it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::model::{AnalysisResult, RecordId};
use crate::queue::{DeadLetterEntry, DeadLetterSink, QueueConsumer};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "dispatch_persisted_total",
            "Results successfully written to the store."
        );
        describe_counter!(
            "dispatch_retries_total",
            "Transient write failures that triggered a backoff."
        );
        describe_counter!(
            "dispatch_rejected_total",
            "Results rejected as permanently invalid."
        );
        describe_counter!(
            "dead_letter_total",
            "Results moved to the dead-letter sink."
        );
    });
}

/// Write seam between the dispatcher and the result store.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn write(&self, result: &AnalysisResult) -> Result<RecordId, StoreError>;
}

/// Configuration for exponential backoff between write attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of retries (not counting the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter fraction added on top of the base delay (0.0 disables).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Deterministic delay for the given retry attempt (0-indexed):
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay with jitter applied. The jitter only lengthens the base
    /// delay, and the cap still holds, so consecutive delays never
    /// shrink while the sequence is growing.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = {
            use rand::Rng;
            rand::thread_rng().gen_range(0.0..self.jitter)
        };
        let secs = (base.as_secs_f64() * (1.0 + spread)).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Terminal state of one dispatched item.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Written to the store. `attempts` counts every write call made.
    Persisted { id: RecordId, attempts: u32 },
    /// Transient failures exhausted the retry budget.
    Exhausted { reason: String, attempts: u32 },
    /// Permanently invalid; no retry was attempted.
    Rejected { reason: String },
}

pub struct Dispatcher {
    sink: Arc<dyn ResultSink>,
    policy: BackoffPolicy,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn ResultSink>, policy: BackoffPolicy) -> Self {
        ensure_metrics_described();
        Self { sink, policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Attempt to persist one result, retrying transient failures with
    /// backoff. The retry delay is a scheduled suspension; other workers
    /// keep draining while this item waits.
    pub async fn dispatch(&self, result: &AnalysisResult) -> DispatchOutcome {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.sink.write(result).await {
                Ok(id) => {
                    counter!("dispatch_persisted_total").increment(1);
                    if attempt > 1 {
                        tracing::info!(
                            symbol = %result.symbol,
                            source = %result.source,
                            attempts = attempt,
                            "write recovered after retries"
                        );
                    }
                    return DispatchOutcome::Persisted { id, attempts: attempt };
                }
                Err(err) if !err.is_retriable() => {
                    counter!("dispatch_rejected_total").increment(1);
                    tracing::warn!(
                        symbol = %result.symbol,
                        source = %result.source,
                        error = %err,
                        "record rejected, not retrying"
                    );
                    return DispatchOutcome::Rejected {
                        reason: err.to_string(),
                    };
                }
                Err(err) => {
                    if attempt > self.policy.max_retries {
                        return DispatchOutcome::Exhausted {
                            reason: err.to_string(),
                            attempts: attempt,
                        };
                    }
                    let delay = self.policy.jittered_delay(attempt - 1);
                    counter!("dispatch_retries_total").increment(1);
                    tracing::warn!(
                        symbol = %result.symbol,
                        source = %result.source,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Spawn `count` workers draining the queue through the dispatcher.
///
/// Workers stop once the queue is closed and empty; items in flight are
/// always driven to a terminal state (store or dead-letter sink) first,
/// so joining the returned handles is the drain barrier for shutdown.
pub fn spawn_workers(
    count: usize,
    consumer: QueueConsumer,
    dispatcher: Arc<Dispatcher>,
    dead_letter: Arc<dyn DeadLetterSink>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let consumer = consumer.clone();
            let dispatcher = dispatcher.clone();
            let dead_letter = dead_letter.clone();
            tokio::spawn(async move {
                while let Some(result) = consumer.dequeue().await {
                    match dispatcher.dispatch(&result).await {
                        DispatchOutcome::Persisted { id, attempts } => {
                            tracing::debug!(
                                worker,
                                id,
                                attempts,
                                symbol = %result.symbol,
                                "result persisted"
                            );
                        }
                        DispatchOutcome::Exhausted { reason, attempts } => {
                            dead_letter
                                .record(DeadLetterEntry::new(&result, reason, attempts))
                                .await;
                        }
                        DispatchOutcome::Rejected { reason } => {
                            dead_letter
                                .record(DeadLetterEntry::new(&result, reason, 1))
                                .await;
                        }
                    }
                }
                tracing::debug!(worker, "dispatch worker stopped, queue closed");
            })
        })
        .collect()
}
