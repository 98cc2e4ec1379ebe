//! Scatter-gather queries over the flight keyspace.
//!
//! There is no index: every query either probes the whole keyspace (fetch-all,
//! search, list-dates) or a fixed set of candidate keys (fetch-by-date). An
//! empty answer is [`QueryOutcome::NoResults`], never an error.

pub mod aggregator;
pub mod fetcher;
pub mod scanner;

pub use aggregator::{gather, Predicate};
pub use fetcher::{fetch_key, fetch_kind};
pub use scanner::scan_keys;

use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::flight::{by_departure, date_key_for, format_date, parse_bare_date, Flight};
use crate::store::{ContainerKind, FlightStore};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const NO_RESULTS_MESSAGE: &str = "no results found";

/// Field name a result list is published under.
pub trait ResultField {
    const FIELD: &'static str;
}

impl ResultField for Flight {
    const FIELD: &'static str = "flights";
}

impl ResultField for String {
    const FIELD: &'static str = "dates";
}

/// Answer to a query: some items, or the explicit empty marker.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<T> {
    Found(Vec<T>),
    NoResults,
}

impl<T> QueryOutcome<T> {
    pub fn from_vec(items: Vec<T>) -> Self {
        if items.is_empty() {
            QueryOutcome::NoResults
        } else {
            QueryOutcome::Found(items)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryOutcome::Found(items) => items.len(),
            QueryOutcome::NoResults => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            QueryOutcome::Found(items) => items,
            QueryOutcome::NoResults => Vec::new(),
        }
    }
}

/// `{"flights": [...]}`, `{"dates": [...]}`, or `{"message": "no results found"}`.
impl<T: Serialize + ResultField> Serialize for QueryOutcome<T> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            QueryOutcome::Found(items) => map.serialize_entry(T::FIELD, items)?,
            QueryOutcome::NoResults => map.serialize_entry("message", NO_RESULTS_MESSAGE)?,
        }
        map.end()
    }
}

/// Search filter. Airport codes compare case-insensitively; `date` is a
/// prefix of the departure timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    pub origin: String,
    pub destination: String,
    pub date: String,
}

impl SearchCriteria {
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        SearchCriteria {
            origin: origin.into(),
            destination: destination.into(),
            date: date.into(),
        }
    }

    pub fn matches(&self, flight: &Flight) -> bool {
        fold_eq(&flight.departure_airport.code, &self.origin)
            && fold_eq(&flight.arrival_airport.code, &self.destination)
            && flight.departure_time.starts_with(&self.date)
    }
}

fn fold_eq(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Query operations over a shared store handle.
pub struct QueryEngine<S> {
    store: Arc<S>,
    config: QueryConfig,
}

impl<S> Clone for QueryEngine<S> {
    fn clone(&self) -> Self {
        QueryEngine {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: FlightStore> QueryEngine<S> {
    pub fn new(store: S, config: QueryConfig) -> Self {
        Self::with_shared(Arc::new(store), config)
    }

    pub fn with_shared(store: Arc<S>, config: QueryConfig) -> Self {
        QueryEngine { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Every decodable record under every key. No ordering.
    pub async fn fetch_all(&self) -> Result<QueryOutcome<Flight>, QueryError> {
        self.bounded("fetch_all", async {
            let keys = scan_keys(&*self.store, self.config.scan_page_size).await?;
            let flights = gather(&self.store, keys, None, self.config.max_in_flight).await;
            Ok(QueryOutcome::from_vec(flights))
        })
        .await
    }

    /// Key names that are bare `YYYY-MM-DD` dates, deduplicated and ascending.
    pub async fn list_dates(&self) -> Result<QueryOutcome<String>, QueryError> {
        self.bounded("list_dates", async {
            let keys = scan_keys(&*self.store, self.config.scan_page_size).await?;
            let dates: BTreeSet<_> = keys.iter().filter_map(|k| parse_bare_date(k)).collect();
            Ok(QueryOutcome::from_vec(dates.into_iter().map(format_date).collect()))
        })
        .await
    }

    /// Records for one date, ascending by departure.
    ///
    /// Looks at the key named `date` first, then at `flights:<date>` when
    /// `date` is a bare date. The first candidate holding a list or hash wins.
    pub async fn fetch_by_date(&self, date: &str) -> Result<QueryOutcome<Flight>, QueryError> {
        self.bounded("fetch_by_date", async {
            let mut candidates = vec![date.to_string()];
            if let Some(day) = parse_bare_date(date) {
                candidates.push(date_key_for(day));
            }

            let mut unsupported = None;
            for key in candidates {
                let kind = self.store.kind(&key).await?;
                match &kind {
                    ContainerKind::List | ContainerKind::Map => {
                        let mut flights = fetch_kind(&*self.store, &key, &kind).await?;
                        flights.sort_by(by_departure);
                        return Ok(QueryOutcome::from_vec(flights));
                    }
                    ContainerKind::Unsupported(name) => {
                        unsupported.get_or_insert((key, name.clone()));
                    }
                    ContainerKind::Missing => {}
                }
            }

            match unsupported {
                Some((key, kind)) => Err(QueryError::UnsupportedKeyType { key, kind }),
                None => Ok(QueryOutcome::NoResults),
            }
        })
        .await
    }

    /// Records matching origin, destination and departure date across the
    /// whole keyspace. No ordering.
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<QueryOutcome<Flight>, QueryError> {
        let criteria = criteria.clone();
        self.bounded("search", async move {
            let keys = scan_keys(&*self.store, self.config.scan_page_size).await?;
            let predicate: Predicate = Arc::new(move |flight: &Flight| criteria.matches(flight));
            let flights =
                gather(&self.store, keys, Some(predicate), self.config.max_in_flight).await;
            Ok(QueryOutcome::from_vec(flights))
        })
        .await
    }

    async fn bounded<T, Fut>(
        &self,
        operation: &'static str,
        query: Fut,
    ) -> Result<QueryOutcome<T>, QueryError>
    where
        Fut: Future<Output = Result<QueryOutcome<T>, QueryError>>,
    {
        let started = Instant::now();
        let outcome = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, query).await {
                Ok(result) => result,
                Err(_) => Err(QueryError::TimedOut(limit)),
            },
            None => query.await,
        };

        match &outcome {
            Ok(found) => info!(
                operation,
                results = found.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query complete"
            ),
            Err(e) => warn!(operation, error = %e, "query failed"),
        }
        outcome
    }
}
