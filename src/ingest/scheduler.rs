// src/ingest/scheduler.rs
use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::sources::AnalysisSource;
use crate::ingest::HighWaterMarks;
use crate::queue::QueueProducer;

#[derive(Clone, Copy, Debug)]
pub struct PollerCfg {
    pub interval: std::time::Duration,
}

/// Spawn the poller: one fetch-map-enqueue pass per tick until the
/// shutdown signal flips.
///
/// The queue producer moves into the task and is dropped when it exits,
/// which closes the queue; dispatcher workers then drain what is left
/// and stop. Signaling shutdown and joining the poller, then the
/// workers, is therefore a full pipeline drain. Missed ticks are
/// delayed, not bursted: time spent suspended on a full queue pushes
/// the next fetch out instead of piling up catch-up runs.
pub fn spawn_poller(
    cfg: PollerCfg,
    sources: Vec<Box<dyn AnalysisSource>>,
    queue: QueueProducer,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut marks = HighWaterMarks::default();
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = super::run_once(&sources, &mut marks, &queue).await;
                    let now = chrono::Utc::now().timestamp().max(0) as u64;
                    counter!("ingest_runs_total").increment(1);
                    gauge!("ingest_last_run_ts").set(now as f64);
                    tracing::info!(
                        target: "ingest",
                        fetched = stats.fetched,
                        enqueued = stats.enqueued,
                        skipped = stats.skipped,
                        upstream_errors = stats.upstream_errors,
                        "ingest tick"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("poller stopped");
    })
}
