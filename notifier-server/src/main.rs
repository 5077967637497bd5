//! Notification service entrypoint.
//!
//! Connects to the document store, ensures its indexes, starts the log
//! consumer's worker pool, and reports processing statistics until a
//! shutdown signal arrives. Shutdown waits for workers to drain within
//! the configured grace window, then force-exits.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notifier_core::config::NotifierConfig;
use notifier_core::consumer::{ConsumerStats, TransferConsumer};
use notifier_core::sink::TransferSink;
use wallet_sdk::shutdown;

/// How often the reporter logs consumer and store statistics.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "notifier-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Override the configured worker count
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NotifierConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.processing.workers = workers;
    }
    init_tracing(&config.log_level);

    tracing::info!("Starting notifier-server v{}", env!("CARGO_PKG_VERSION"));

    tracing::info!("Connecting to document store...");
    let sink = Arc::new(TransferSink::connect(&config.mongo).await?);
    sink.ping().await?;
    sink.ensure_indexes().await?;
    tracing::info!("Document store connection established");

    let consumer = TransferConsumer::new(&config.kafka, config.processing.clone(), Arc::clone(&sink))?;
    let stats = consumer.stats();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reporter = tokio::spawn(stats_reporter(
        Arc::clone(&stats),
        Arc::clone(&sink),
        shutdown_rx.clone(),
    ));
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    shutdown::wait_for_shutdown().await;

    // --- Graceful shutdown sequence ---
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.processing.shutdown_grace, consumer_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("consumer drained cleanly"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "consumer stopped with an error"),
        Ok(Err(e)) => tracing::error!(error = %e, "consumer task panicked"),
        Err(_) => tracing::warn!(
            grace_secs = config.processing.shutdown_grace.as_secs(),
            "shutdown grace exceeded, dropping pending batches"
        ),
    }
    let _ = reporter.await;

    let snapshot = stats.snapshot();
    tracing::info!(
        processed = snapshot.processed,
        failed = snapshot.failed,
        rate = format!("{:.2}", snapshot.rate),
        uptime_secs = snapshot.uptime.as_secs(),
        "final consumer statistics"
    );

    sink.close().await;
    tracing::info!("notifier-server shutdown complete");

    Ok(())
}

/// Log consumer and store statistics on a fixed interval.
async fn stats_reporter(
    stats: Arc<ConsumerStats>,
    sink: Arc<TransferSink>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let snapshot = stats.snapshot();
                tracing::info!(
                    processed = snapshot.processed,
                    failed = snapshot.failed,
                    rate = format!("{:.2}", snapshot.rate),
                    uptime_secs = snapshot.uptime.as_secs(),
                    "consumer statistics"
                );

                match sink.statistics().await {
                    Ok(stored) => tracing::info!(
                        total_processed = stored.total_processed,
                        total_failed = stored.total_failed,
                        average_amount = stored.average_amount,
                        total_amount = stored.total_amount,
                        "store statistics"
                    ),
                    Err(e) => tracing::warn!(error = %e, "failed to fetch store statistics"),
                }
            }
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},rdkafka=warn,mongodb=warn")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
