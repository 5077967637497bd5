//! Wallet service entrypoint.
//!
//! Assembles the engine's collaborators leaves-first (rates cache, rate
//! client, event publisher, then the engine itself), runs a periodic
//! health probe, and tears everything down in order on SIGTERM/SIGINT.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wallet_core::cache::RatesCache;
use wallet_core::config::WalletConfig;
use wallet_core::engine::WalletEngine;
use wallet_core::publisher::EventPublisher;
use wallet_sdk::client::RateClient;
use wallet_sdk::shutdown;

/// How often the supervisor probes its dependencies.
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "wallet-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A malformed environment is a startup validation failure: exit
    // non-zero before touching any dependency.
    let config = WalletConfig::from_env()?;
    init_tracing(&config.log_level);

    tracing::info!("Starting wallet-server v{}", env!("CARGO_PKG_VERSION"));

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_open_conns)
        .min_connections(config.database.max_idle_conns)
        .max_lifetime(config.database.conn_max_lifetime)
        .connect(&config.database.url())
        .await?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&pool).await?;
        tracing::info!("Migrations completed successfully");
    }

    // Dependency order, leaves first.
    let rates = Arc::new(RatesCache::new(config.cache_rates_ttl));
    let rate_client = Arc::new(RateClient::new(
        config.exchanger.addr(),
        config.exchanger.timeout,
    ));
    let publisher = Arc::new(EventPublisher::new(
        &config.kafka.brokers,
        &config.kafka.topic,
        config.kafka.transfer_threshold,
    )?);
    let engine = Arc::new(WalletEngine::new(
        pool.clone(),
        rates,
        Arc::clone(&rate_client),
        Arc::clone(&publisher),
    )?);
    tracing::info!(
        exchanger = %config.exchanger.addr(),
        topic = %config.kafka.topic,
        "wallet engine assembled"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let probe = tokio::spawn(health_probe(pool.clone(), engine, shutdown_rx));

    shutdown::wait_for_shutdown().await;

    // --- Graceful shutdown sequence ---
    let _ = shutdown_tx.send(true);
    let _ = probe.await;

    publisher.close();
    rate_client.close().await;

    tracing::info!("Closing database connections...");
    pool.close().await;
    tracing::info!("wallet-server shutdown complete");

    Ok(())
}

/// Periodically ping the store and refresh the rate table.
///
/// Failures are logged, never fatal: the wallet keeps serving from the
/// cache while the rate service is down, and the store pool reconnects on
/// its own.
async fn health_probe(
    pool: PgPool,
    engine: Arc<WalletEngine>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(HEALTH_PROBE_INTERVAL);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!("health probe shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                match sqlx::query("SELECT 1").execute(&pool).await {
                    Ok(_) => tracing::debug!("store ping ok"),
                    Err(e) => tracing::warn!(error = %e, "store ping failed"),
                }
                match engine.get_exchange_rates().await {
                    Ok(rates) => tracing::debug!(pairs = rates.len(), "rate table refreshed"),
                    Err(e) => tracing::warn!(error = %e, "rate service probe failed"),
                }
            }
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},sqlx=warn,rdkafka=warn")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
