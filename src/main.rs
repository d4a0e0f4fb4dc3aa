//! Analysis-result writer service — binary entrypoint.
//! Wires the poller, bounded queue, dispatcher workers, and PostgreSQL
//! result store, then runs until SIGINT with a full pipeline drain on
//! the way out.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stock_analysis_ingest::config::Settings;
use stock_analysis_ingest::dispatch::{spawn_workers, Dispatcher};
use stock_analysis_ingest::ingest::scheduler::{spawn_poller, PollerCfg};
use stock_analysis_ingest::ingest::sources::{AnalysisSource, HttpAnalysisSource};
use stock_analysis_ingest::queue::{self, DeadLetterSink, TracingDeadLetter};
use stock_analysis_ingest::store::ResultStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stock_analysis_ingest=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env().context("loading settings")?;
    tracing::info!(
        workers = settings.workers,
        queue_capacity = settings.queue_capacity,
        poll_interval_secs = settings.poll_interval_secs,
        "starting analysis-result writer service"
    );

    let store = ResultStore::connect(
        &settings.database_url,
        settings.pool_max_connections,
        settings.pool_acquire_timeout(),
    )
    .await
    .context("connecting to PostgreSQL")?;
    store.initialize().await.context("initializing schema")?;

    let (producer, consumer) = queue::bounded(settings.queue_capacity);

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(store.clone()),
        settings.backoff_policy(),
    ));
    let dead_letter: Arc<dyn DeadLetterSink> = Arc::new(TracingDeadLetter);
    let workers = spawn_workers(settings.workers, consumer, dispatcher, dead_letter);

    let sources: Vec<Box<dyn AnalysisSource>> = vec![Box::new(HttpAnalysisSource::new(
        settings.source_name.clone(),
        settings.source_url.clone(),
    ))];
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = spawn_poller(
        PollerCfg {
            interval: settings.poll_interval(),
        },
        sources,
        producer,
        shutdown_rx,
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received, draining pipeline");

    // Stop the poller first; dropping its producer closes the queue.
    let _ = shutdown_tx.send(true);
    poller.await.context("joining poller")?;

    // Workers exit once the closed queue is drained; every in-flight
    // item reaches the store or the dead-letter sink before this joins.
    for handle in workers {
        handle.await.context("joining dispatch worker")?;
    }

    store.close().await;
    tracing::info!("drained and stopped");
    Ok(())
}
