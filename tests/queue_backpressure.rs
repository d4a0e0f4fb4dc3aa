// tests/queue_backpressure.rs
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use stock_analysis_ingest::queue;
use stock_analysis_ingest::{AnalysisResult, EnqueueError};

fn result(symbol: &str) -> AnalysisResult {
    AnalysisResult::new(symbol, "test", Utc::now(), json!({"n": 1}))
}

#[tokio::test]
async fn try_enqueue_signals_queue_full_until_capacity_frees() {
    let (tx, rx) = queue::bounded(3);
    for s in ["A", "B", "C"] {
        tx.try_enqueue(result(s)).unwrap();
    }

    let held = match tx.try_enqueue(result("D")) {
        Err(EnqueueError::QueueFull(r)) => r,
        other => panic!("expected QueueFull, got {other:?}"),
    };

    // Capacity freed: the held item goes through.
    assert_eq!(rx.dequeue().await.unwrap().symbol, "A");
    tx.try_enqueue(held).unwrap();
    assert_eq!(rx.dequeue().await.unwrap().symbol, "B");
    assert_eq!(rx.dequeue().await.unwrap().symbol, "C");
    assert_eq!(rx.dequeue().await.unwrap().symbol, "D");
}

#[tokio::test]
async fn blocking_enqueue_suspends_then_resumes() {
    let (tx, rx) = queue::bounded(1);
    tx.enqueue(result("A")).await.unwrap();

    // Queue full: enqueue must suspend rather than fail or drop.
    let blocked = tokio::time::timeout(Duration::from_millis(50), tx.enqueue(result("B"))).await;
    assert!(blocked.is_err(), "enqueue should still be suspended");

    // A consumer frees a slot; the same enqueue now completes quickly.
    let producer = tx.clone();
    let feeder = tokio::spawn(async move { producer.enqueue(result("B")).await });
    assert_eq!(rx.dequeue().await.unwrap().symbol, "A");

    tokio::time::timeout(Duration::from_secs(1), feeder)
        .await
        .expect("enqueue should resume after dequeue")
        .unwrap()
        .unwrap();
    assert_eq!(rx.dequeue().await.unwrap().symbol, "B");
}
