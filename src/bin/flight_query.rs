//! One-shot query client: runs a single query against the store and prints
//! the JSON outcome on stdout. Logs go to stderr.

use clap::{Parser, Subcommand};
use flight_feed::config::FlightFeedConfig;
use flight_feed::observability::init_tracing;
use flight_feed::query::{QueryEngine, SearchCriteria};
use flight_feed::store::RedisFlightStore;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "flight-query")]
#[command(about = "Query flights stored by the flight feed service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store connection string (overrides config)
    #[arg(long, env = "FLIGHT_FEED_REDIS_URL")]
    redis_url: Option<String>,

    /// Bound on the whole query, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Every stored flight
    All,
    /// Key names that are bare YYYY-MM-DD dates
    Dates,
    /// Flights for one date, ascending by departure
    Date {
        /// A key name or YYYY-MM-DD date
        date: String,
    },
    /// Flights by origin, destination and departure date
    Search {
        #[arg(long)]
        origin: String,

        #[arg(long)]
        destination: String,

        #[arg(long)]
        date: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = FlightFeedConfig::load_unvalidated()?;
    config.schedule.enabled = false;
    if let Some(url) = cli.redis_url {
        config.store.redis_url = url;
    }
    if let Some(ms) = cli.timeout_ms {
        config.query.timeout = Some(Duration::from_millis(ms));
    }
    config.validate()?;
    init_tracing(&config.logging);

    let store = RedisFlightStore::connect(&config.store).await?;
    let engine = QueryEngine::new(store, config.query.clone());

    let output = match cli.command {
        Commands::All => render(&engine.fetch_all().await?, cli.pretty)?,
        Commands::Dates => render(&engine.list_dates().await?, cli.pretty)?,
        Commands::Date { date } => render(&engine.fetch_by_date(&date).await?, cli.pretty)?,
        Commands::Search {
            origin,
            destination,
            date,
        } => {
            let criteria = SearchCriteria::new(origin, destination, date);
            render(&engine.search(&criteria).await?, cli.pretty)?
        }
    };

    println!("{}", output);
    Ok(())
}

fn render<T: serde::Serialize>(value: &T, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}
