pub mod config;
pub mod dst;
pub mod error;
pub mod flight;
pub mod ingest;
pub mod observability;
pub mod query;
pub mod store;

pub use config::FlightFeedConfig;
pub use error::{IngestError, QueryError, StoreError, WriteError};
pub use flight::{Airport, Flight};
pub use ingest::{IngestReport, IngestionScheduler, Ingestor, SchedulerHandle};
pub use query::{QueryEngine, QueryOutcome, SearchCriteria};
pub use store::{FlightStore, InMemoryFlightStore, RedisFlightStore};
