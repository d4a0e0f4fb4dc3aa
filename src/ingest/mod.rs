// src/ingest/mod.rs
pub mod scheduler;
pub mod sources;

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

use crate::error::EnqueueError;
use crate::ingest::sources::{AnalysisSource, RawAnalysisRecord};
use crate::model::AnalysisResult;
use crate::queue::QueueProducer;

/// One-time metrics registration (so series show up on first emission).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_fetched_total", "Raw records fetched from upstream.");
        describe_counter!("ingest_enqueued_total", "Results accepted into the queue.");
        describe_counter!(
            "ingest_skipped_total",
            "Raw records dropped at mapping time (malformed)."
        );
        describe_counter!("ingest_upstream_errors_total", "Upstream fetch failures.");
        describe_counter!("ingest_runs_total", "Completed poll ticks.");
        describe_gauge!("ingest_last_run_ts", "Unix ts of the last poll tick.");
        describe_gauge!("queue_depth", "Results currently buffered in the queue.");
    });
}

/// Map a raw upstream record into a validated `AnalysisResult`.
///
/// A missing `source` defaults to `"unknown"`; everything else the
/// storage contract requires must be present and well-formed.
pub fn map_record(raw: RawAnalysisRecord) -> Result<AnalysisResult> {
    let symbol = raw
        .symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("missing symbol"))?;
    let source = raw
        .source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let timestamp = raw.timestamp.ok_or_else(|| anyhow!("missing timestamp"))?;
    let payload = raw.payload.ok_or_else(|| anyhow!("missing payload"))?;

    let result = AnalysisResult::new(symbol, source, timestamp, payload);
    result.validate()?;
    Ok(result)
}

/// Last successfully enqueued timestamp per upstream source, so a
/// repeated fetch resumes without re-reading already-queued items.
/// Items already dispatched may still be re-fetched after a process
/// restart; the store tolerates the duplicates.
#[derive(Debug, Default)]
pub struct HighWaterMarks {
    marks: HashMap<String, DateTime<Utc>>,
}

impl HighWaterMarks {
    pub fn get(&self, source: &str) -> Option<DateTime<Utc>> {
        self.marks.get(source).copied()
    }

    /// Advance the mark, never moving it backwards.
    pub fn advance(&mut self, source: &str, ts: DateTime<Utc>) {
        self.marks
            .entry(source.to_string())
            .and_modify(|cur| {
                if ts > *cur {
                    *cur = ts;
                }
            })
            .or_insert(ts);
    }
}

/// Counters from one poll tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub fetched: usize,
    pub enqueued: usize,
    pub skipped: usize,
    pub upstream_errors: usize,
}

/// Fetch one batch from every source, map, and enqueue.
///
/// `enqueue` suspends while the queue is full; that suspension is the
/// backpressure pause and nothing is dropped. Malformed raw records are
/// logged, counted, and skipped while the batch continues; upstream
/// fetch failures are transient and retried on the next tick.
pub async fn run_once(
    sources: &[Box<dyn AnalysisSource>],
    marks: &mut HighWaterMarks,
    queue: &QueueProducer,
) -> IngestStats {
    ensure_metrics_described();

    let mut stats = IngestStats::default();
    for src in sources {
        let batch = match src.fetch_since(marks.get(src.name())).await {
            Ok(batch) => batch,
            Err(e) => {
                stats.upstream_errors += 1;
                counter!("ingest_upstream_errors_total").increment(1);
                tracing::warn!(source = src.name(), error = ?e, "upstream fetch failed");
                continue;
            }
        };

        stats.fetched += batch.len();
        counter!("ingest_fetched_total").increment(batch.len() as u64);

        for raw in batch {
            let result = match map_record(raw) {
                Ok(r) => r,
                Err(e) => {
                    stats.skipped += 1;
                    counter!("ingest_skipped_total").increment(1);
                    tracing::warn!(source = src.name(), error = %e, "skipping malformed record");
                    continue;
                }
            };

            let ts = result.timestamp;
            match queue.enqueue(result).await {
                Ok(()) => {
                    stats.enqueued += 1;
                    counter!("ingest_enqueued_total").increment(1);
                    marks.advance(src.name(), ts);
                }
                Err(EnqueueError::Closed(_)) => {
                    tracing::warn!(source = src.name(), "queue closed, stopping ingest run");
                    return stats;
                }
                // enqueue() suspends instead of reporting QueueFull
                Err(EnqueueError::QueueFull(_)) => unreachable!("blocking enqueue reported full"),
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn raw(symbol: Option<&str>, source: Option<&str>) -> RawAnalysisRecord {
        RawAnalysisRecord {
            symbol: symbol.map(String::from),
            source: source.map(String::from),
            timestamp: Some(Utc::now()),
            payload: Some(json!({"score": 0.4})),
        }
    }

    #[test]
    fn map_defaults_missing_source_to_unknown() {
        let r = map_record(raw(Some("AAPL"), None)).unwrap();
        assert_eq!(r.source, "unknown");
        assert_eq!(r.symbol, "AAPL");
    }

    #[test]
    fn map_rejects_missing_symbol() {
        assert!(map_record(raw(None, Some("x"))).is_err());
        assert!(map_record(raw(Some("  "), Some("x"))).is_err());
    }

    #[test]
    fn map_rejects_missing_timestamp_or_payload() {
        let mut r = raw(Some("AAPL"), Some("x"));
        r.timestamp = None;
        assert!(map_record(r).is_err());

        let mut r = raw(Some("AAPL"), Some("x"));
        r.payload = None;
        assert!(map_record(r).is_err());
    }

    #[test]
    fn map_rejects_non_object_payload() {
        let mut r = raw(Some("AAPL"), Some("x"));
        r.payload = Some(json!(["not", "an", "object"]));
        assert!(map_record(r).is_err());
    }

    #[test]
    fn high_water_mark_never_regresses() {
        let mut marks = HighWaterMarks::default();
        let t1 = Utc::now();
        let t0 = t1 - chrono::Duration::seconds(60);
        marks.advance("feed", t1);
        marks.advance("feed", t0);
        assert_eq!(marks.get("feed"), Some(t1));
        assert_eq!(marks.get("other"), None);
    }

    /// Serves one fixed batch, then empty batches; shares a log of the
    /// cursor passed to every call.
    struct ScriptedSource {
        batch: Mutex<Vec<RawAnalysisRecord>>,
        cursors: Arc<Mutex<Vec<Option<DateTime<Utc>>>>>,
    }

    impl ScriptedSource {
        fn new(
            batch: Vec<RawAnalysisRecord>,
        ) -> (Self, Arc<Mutex<Vec<Option<DateTime<Utc>>>>>) {
            let cursors = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    batch: Mutex::new(batch),
                    cursors: cursors.clone(),
                },
                cursors,
            )
        }
    }

    #[async_trait::async_trait]
    impl AnalysisSource for ScriptedSource {
        async fn fetch_since(
            &self,
            cursor: Option<DateTime<Utc>>,
        ) -> anyhow::Result<Vec<RawAnalysisRecord>> {
            self.cursors.lock().unwrap().push(cursor);
            Ok(std::mem::take(&mut *self.batch.lock().unwrap()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn run_once_enqueues_advances_mark_and_resumes_from_it() {
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(30);
        let batch = vec![
            RawAnalysisRecord {
                symbol: Some("AAPL".into()),
                source: Some("sentiment".into()),
                timestamp: Some(t1),
                payload: Some(json!({"score": 0.1})),
            },
            raw(None, Some("sentiment")), // malformed, skipped
            RawAnalysisRecord {
                symbol: Some("MSFT".into()),
                source: Some("sentiment".into()),
                timestamp: Some(t2),
                payload: Some(json!({"score": 0.2})),
            },
        ];
        let (scripted, cursors) = ScriptedSource::new(batch);
        let sources: Vec<Box<dyn AnalysisSource>> = vec![Box::new(scripted)];
        let (tx, rx) = queue::bounded(8);
        let mut marks = HighWaterMarks::default();

        let stats = run_once(&sources, &mut marks, &tx).await;
        assert_eq!(stats.fetched, 3);
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(marks.get("scripted"), Some(t2));

        // FIFO arrival order survives into the queue.
        assert_eq!(rx.dequeue().await.unwrap().symbol, "AAPL");
        assert_eq!(rx.dequeue().await.unwrap().symbol, "MSFT");

        // The next run fetches from the high-water mark.
        let stats = run_once(&sources, &mut marks, &tx).await;
        assert_eq!(stats.enqueued, 0);
        let seen = cursors.lock().unwrap().clone();
        assert_eq!(seen, vec![None, Some(t2)]);
    }

    #[tokio::test]
    async fn run_once_counts_upstream_errors_and_continues() {
        struct FailingSource;

        #[async_trait::async_trait]
        impl AnalysisSource for FailingSource {
            async fn fetch_since(
                &self,
                _cursor: Option<DateTime<Utc>>,
            ) -> anyhow::Result<Vec<RawAnalysisRecord>> {
                Err(anyhow!("upstream down"))
            }

            fn name(&self) -> &str {
                "failing"
            }
        }

        let (scripted, _) = ScriptedSource::new(vec![raw(Some("AAPL"), Some("s"))]);
        let sources: Vec<Box<dyn AnalysisSource>> =
            vec![Box::new(FailingSource), Box::new(scripted)];
        let (tx, _rx) = queue::bounded(4);
        let mut marks = HighWaterMarks::default();

        let stats = run_once(&sources, &mut marks, &tx).await;
        assert_eq!(stats.upstream_errors, 1);
        assert_eq!(stats.enqueued, 1);
    }
}
