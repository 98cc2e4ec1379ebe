//! Flight feed ingestion service
//!
//! Periodically pulls the upstream flight feed and files every record under a
//! per-date Redis list.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | FLIGHT_FEED_CONFIG | - | Path to a TOML config file |
//! | FLIGHT_FEED_REDIS_URL | redis://127.0.0.1:6379 | Store connection string |
//! | FLIGHT_FEED_URL | - | Upstream feed URL (required) |
//! | FLIGHT_FEED_INTERVAL_SECS | 1800 | Time between runs |
//! | FLIGHT_FEED_LIFETIME_SECS | 0 | Scheduler lifetime, 0 = until Ctrl+C |
//! | FLIGHT_FEED_LOG_FORMAT | text | text or json |
//! | FLIGHT_FEED_LOG | info | Filter when RUST_LOG is unset |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use flight_feed::config::FlightFeedConfig;
use flight_feed::ingest::{HttpFeed, IngestionScheduler, Ingestor};
use flight_feed::observability::init_tracing;
use flight_feed::store::RedisFlightStore;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = FlightFeedConfig::load()?;
    init_tracing(&config.logging);

    let store = RedisFlightStore::connect(&config.store).await?;

    if !config.schedule.enabled {
        info!("ingestion disabled, waiting for shutdown");
        signal::ctrl_c().await?;
        return Ok(());
    }

    let feed = HttpFeed::new(&config.feed)?;
    let ingestor = Ingestor::new(feed, store, config.feed.max_record_bytes);
    let handle = IngestionScheduler::new(ingestor, config.schedule.clone()).start();

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let stats = handle.shutdown(config.schedule.shutdown_grace).await;
    info!(
        runs = stats.runs_started,
        failed = stats.runs_failed,
        skipped_ticks = stats.ticks_skipped,
        written = stats.records_written,
        "flight feed service stopped"
    );
    Ok(())
}
